use crate::config::{ConfigurationView, value_kind};
use crate::directives::OneOrMany;
use crate::errors::{PipelineError, PipelineResult};
use quill_store::PathComponent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Ancestor scope keys and fan-out indices leading to a node's configuration.
pub type ScopePath = Vec<PathComponent>;

/// A stage as declared under the `pipeline` configuration key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(
        default,
        rename = "output-artifact",
        alias = "outputArtifact",
        skip_serializing_if = "Option::is_none"
    )]
    pub output_artifact: Option<String>,
}

impl StageDeclaration {
    pub fn inputs(&self) -> Vec<String> {
        self.input.as_ref().map(OneOrMany::to_vec).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineNode {
    pub name: String,
    pub plugin_name: String,
    pub output_artifact: Option<String>,
    pub config_scope: ScopePath,
    pub input_names: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineGraph {
    pub nodes: BTreeMap<String, PipelineNode>,
    pub configs: BTreeMap<String, ConfigurationView>,
}

impl PipelineGraph {
    pub fn node(&self, name: &str) -> PipelineResult<&PipelineNode> {
        self.nodes
            .get(name)
            .ok_or_else(|| PipelineError::UnknownNode(name.to_string()))
    }

    pub fn config_for(&self, node: &PipelineNode) -> PipelineResult<&ConfigurationView> {
        let key = scope_key(&node.config_scope)?;
        self.configs.get(&key).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "no configuration cached for scope {key} of node '{}'",
                node.name
            ))
        })
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Serialized form of a scope path, used as the configuration cache key.
pub fn scope_key(path: &[PathComponent]) -> PipelineResult<String> {
    serde_json::to_string(path)
        .map_err(|err| PipelineError::Configuration(format!("scope path is not serializable: {err}")))
}

/// Resolves `reference` relative to `stage`: walking up the stage's
/// namespace, `prefix + reference` is tried for each enclosing prefix until
/// one is declared.
pub fn resolve_stage_name(
    stage: &str,
    reference: &str,
    mut is_declared: impl FnMut(&str) -> bool,
) -> Option<String> {
    let mut current = stage.to_string();
    while !current.is_empty() {
        current.pop();
        current.truncate(current.rfind('/').map_or(0, |at| at + 1));
        let candidate = format!("{current}{reference}");
        if is_declared(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Reads the `pipeline` stage declarations of `config`.
pub fn stage_declarations(config: &ConfigurationView) -> PipelineResult<BTreeMap<String, StageDeclaration>> {
    let Some(value) = config.raw().get("pipeline") else {
        return Ok(BTreeMap::new());
    };
    let Value::Object(stages) = value else {
        return Err(PipelineError::Configuration(format!(
            "'pipeline' must be an object, found {}",
            value_kind(value)
        )));
    };
    stages
        .iter()
        .map(|(name, declaration)| {
            serde_json::from_value::<StageDeclaration>(declaration.clone())
                .map(|declaration| (name.clone(), declaration))
                .map_err(|err| {
                    PipelineError::Configuration(format!("invalid declaration for stage '{name}': {err}"))
                })
        })
        .collect()
}

/// Builds the node graph for every stage declared in `config`.
pub fn build_pipeline(config: &ConfigurationView) -> PipelineResult<PipelineGraph> {
    let declarations = stage_declarations(config)?;
    let mut builder = GraphBuilder {
        declarations,
        suffixes: BTreeMap::new(),
        in_progress: HashSet::new(),
        graph: PipelineGraph::default(),
    };
    builder.graph.configs.insert(scope_key(&[])?, config.clone());

    let names: Vec<String> = builder.declarations.keys().cloned().collect();
    for name in names {
        builder.expand_stage(&name)?;
    }

    tracing::debug!(
        stages = builder.declarations.len(),
        nodes = builder.graph.len(),
        "pipeline graph built"
    );
    Ok(builder.graph)
}

struct StagePlan {
    name: String,
    plugin: String,
    scope: String,
    output_artifact: Option<String>,
}

struct GraphBuilder {
    declarations: BTreeMap<String, StageDeclaration>,
    suffixes: BTreeMap<String, Vec<String>>,
    in_progress: HashSet<String>,
    graph: PipelineGraph,
}

impl GraphBuilder {
    /// Creates the nodes of `name` (and, first, of its inputs) once and
    /// returns the suffixes of the created nodes.
    fn expand_stage(&mut self, name: &str) -> PipelineResult<Vec<String>> {
        if let Some(suffixes) = self.suffixes.get(name) {
            return Ok(suffixes.clone());
        }
        let declaration = self
            .declarations
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        if !self.in_progress.insert(name.to_string()) {
            return Err(PipelineError::CyclicStage(name.to_string()));
        }

        let mut inputs = Vec::new();
        for reference in declaration.inputs() {
            let resolved = resolve_stage_name(name, &reference, |candidate| {
                self.declarations.contains_key(candidate)
            })
            .ok_or_else(|| PipelineError::UnresolvedStage {
                stage: name.to_string(),
                reference: reference.clone(),
            })?;
            self.expand_stage(&resolved)?;
            inputs.push(resolved);
        }

        let plan = StagePlan {
            name: name.to_string(),
            plugin: declaration
                .plugin
                .clone()
                .unwrap_or_else(|| name.rsplit('/').next().unwrap_or(name).to_string()),
            scope: declaration
                .scope
                .clone()
                .unwrap_or_else(|| format!("pipeline.{name}")),
            output_artifact: declaration.output_artifact.clone(),
        };
        let mut suffixes = Vec::new();
        self.add_nodes(&plan, &inputs, String::new(), Vec::new(), Vec::new(), &mut suffixes)?;

        self.in_progress.remove(name);
        self.suffixes.insert(name.to_string(), suffixes.clone());
        Ok(suffixes)
    }

    /// Pairs every instance of each remaining input with the stage, then
    /// fans the stage out over its own scope. The scope of the last input
    /// visited becomes the parent configuration of the new nodes.
    fn add_nodes(
        &mut self,
        plan: &StagePlan,
        remaining_inputs: &[String],
        suffix: String,
        input_nodes: Vec<String>,
        config_scope: ScopePath,
        created: &mut Vec<String>,
    ) -> PipelineResult<()> {
        let Some((input, rest)) = remaining_inputs.split_first() else {
            let parent_key = scope_key(&config_scope)?;
            let parent = self.graph.configs.get(&parent_key).cloned().ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "stage '{}' has no configuration for scope {parent_key}",
                    plan.name
                ))
            })?;
            let instances = parent.nested_configuration(&plan.scope)?;
            let count = instances.len();
            for (index, instance) in instances.into_iter().enumerate() {
                let node_suffix = if count == 1 {
                    suffix.clone()
                } else {
                    format!("{suffix}/{index}")
                };
                let mut node_scope = config_scope.clone();
                node_scope.push(PathComponent::Key(plan.scope.clone()));
                node_scope.push(PathComponent::Index(index));
                self.graph.configs.insert(scope_key(&node_scope)?, instance);

                let node_name = format!("{}{node_suffix}", plan.name);
                self.graph.nodes.insert(
                    node_name.clone(),
                    PipelineNode {
                        name: node_name,
                        plugin_name: plan.plugin.clone(),
                        output_artifact: plan.output_artifact.clone(),
                        config_scope: node_scope,
                        input_names: input_nodes.clone(),
                    },
                );
                created.push(node_suffix);
            }
            return Ok(());
        };

        let input_suffixes = self.suffixes.get(input).cloned().unwrap_or_default();
        for input_suffix in input_suffixes {
            let input_node = format!("{input}{input_suffix}");
            let inherited_scope = self.graph.node(&input_node)?.config_scope.clone();
            let mut nodes = input_nodes.clone();
            nodes.push(input_node);
            self.add_nodes(
                plan,
                rest,
                format!("{suffix}{input_suffix}"),
                nodes,
                inherited_scope,
                created,
            )?;
        }
        Ok(())
    }
}
