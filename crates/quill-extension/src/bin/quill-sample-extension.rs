//! Sample extension speaking the quill plugin protocol over stdio.
//!
//! Plugins:
//! - `echo` copies every input document to the output.
//! - `shout` does the same with the content uppercased.
//! - `fail` reports an error and returns `false`.

use quill_extension::protocol::{
    GET_PLUGIN_NAMES, LIST_INPUTS, MESSAGE, PROCESS, READ_FILE, WRITE_FILE, string_param,
};
use quill_extension::{ExtensionError, Incoming, PluginConnection, RpcError};
use quill_pipeline::{Channel, Message};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};

const PLUGINS: [&str; 3] = ["echo", "shout", "fail"];

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ExtensionError> {
    let mut connection = PluginConnection::stdio();
    while let Some(message) = connection.next_message().await? {
        let Incoming::Request { id, method, params } = message else {
            continue;
        };
        let result = match method.as_str() {
            GET_PLUGIN_NAMES => Ok(json!(PLUGINS)),
            PROCESS => process(&mut connection, &params).await,
            other => Err(RpcError::method_not_found(other)),
        };
        connection.respond(id, result).await?;
    }
    Ok(())
}

async fn process<R, W>(connection: &mut PluginConnection<R, W>, params: &[Value]) -> Result<Value, RpcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let plugin = string_param(params, 0)?;
    let session = string_param(params, 1)?;
    run_plugin(connection, &plugin, &session)
        .await
        .map(Value::Bool)
        .map_err(|err| RpcError::internal(err.to_string()))
}

async fn run_plugin<R, W>(
    connection: &mut PluginConnection<R, W>,
    plugin: &str,
    session: &str,
) -> Result<bool, ExtensionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !PLUGINS.contains(&plugin) {
        return Err(ExtensionError::UnknownPlugin(plugin.to_string()));
    }
    if plugin == "fail" {
        let message = Message::new(Channel::Error, "fail plugin always fails").with_key(["AlwaysFails"]);
        send_message(connection, session, &message).await?;
        return Ok(false);
    }

    let listed = connection.request(LIST_INPUTS, vec![json!(session)]).await?;
    let names: Vec<String> = serde_json::from_value(listed)
        .map_err(|err| ExtensionError::Protocol(format!("{LIST_INPUTS} returned a non-list: {err}")))?;
    for name in names {
        let content = connection
            .request(READ_FILE, vec![json!(session), json!(name)])
            .await?;
        let content = content.as_str().unwrap_or_default();
        let output = match plugin {
            "shout" => content.to_uppercase(),
            _ => content.to_string(),
        };
        send_message(
            connection,
            session,
            &Message::new(Channel::Information, format!("{plugin} processed {name}")),
        )
        .await?;
        connection
            .notify(WRITE_FILE, vec![json!(session), json!(name), json!(output)])
            .await?;
    }
    Ok(true)
}

async fn send_message<R, W>(
    connection: &mut PluginConnection<R, W>,
    session: &str,
    message: &Message,
) -> Result<(), ExtensionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let message = serde_json::to_value(message)
        .map_err(|err| ExtensionError::Protocol(format!("message is not serializable: {err}")))?;
    connection.notify(MESSAGE, vec![json!(session), message]).await
}
