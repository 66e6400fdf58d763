use crate::types::Position;

#[derive(Clone, Debug, PartialEq)]
pub struct BlameTree {
    pub document: String,
    pub position: Position,
    pub children: Vec<BlameTree>,
}

impl BlameTree {
    pub fn leaf(document: impl Into<String>, position: Position) -> Self {
        Self {
            document: document.into(),
            position,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Original locations in depth-first, left-to-right order.
    pub fn leaves(&self) -> Vec<&BlameTree> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                out.push(node);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_nested_tree_expected_left_to_right_order() {
        let tree = BlameTree {
            document: "out".to_string(),
            position: Position::at(1, 0),
            children: vec![
                BlameTree {
                    document: "mid".to_string(),
                    position: Position::at(2, 0),
                    children: vec![
                        BlameTree::leaf("a", Position::at(3, 0)),
                        BlameTree::leaf("b", Position::at(4, 0)),
                    ],
                },
                BlameTree::leaf("c", Position::at(5, 0)),
            ],
        };

        let documents: Vec<&str> = tree
            .leaves()
            .into_iter()
            .map(|leaf| leaf.document.as_str())
            .collect();
        assert_eq!(documents, vec!["a", "b", "c"]);
    }

    #[test]
    fn leaves_single_node_expected_itself() {
        let tree = BlameTree::leaf("doc", Position::default());
        assert_eq!(tree.leaves().len(), 1);
    }
}
