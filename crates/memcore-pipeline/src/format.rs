//! The tool-result line format every retrieval tool, safety net, and the
//! assembler agree on (spec §4.5/§4.7/§6): `[type[/subtype]] content (id:
//! <id>, salience: <n>) [score: <f>]`. The trailing score is only present
//! when the line came from a vector search; the assembler treats a
//! missing score as 0.5.

use memcore_graph::Node;

/// Render a node as one formatted result line. `score` is `None` for
/// non-vector lookups (e.g. `get_relationships`, `get_instructions`).
pub fn format_node_line(node: &Node, score: Option<f32>) -> String {
    let type_part = match &node.subtype {
        Some(st) => format!("{}/{}", node.node_type, st),
        None => node.node_type.to_string(),
    };
    let mut line = format!(
        "[{}] {} (id: {}, salience: {})",
        type_part, node.content, node.id, node.salience
    );
    if let Some(s) = score {
        line.push_str(&format!(" [score: {:.4}]", s));
    }
    line
}

/// Default score the assembler applies when a result line carries no
/// trailing `[score: ...]` (spec §4.7).
pub const DEFAULT_SCORE: f32 = 0.5;

/// Extract `(id, score)` from one formatted result line, per the
/// convention above. Returns `None` for lines that don't carry an `(id:
/// ...)` component at all (e.g. plain error/status text).
pub fn parse_result_line(line: &str) -> Option<(String, f32)> {
    let id_marker = "(id: ";
    let id_start = line.find(id_marker)? + id_marker.len();
    let rest = &line[id_start..];
    let id_end = rest.find(|c| c == ',' || c == ')')?;
    let id = rest[..id_end].trim().to_string();
    if id.is_empty() {
        return None;
    }

    let score = match line.find("[score: ") {
        Some(sidx) => {
            let s_start = sidx + "[score: ".len();
            let s_end = line[s_start..].find(']')? + s_start;
            line[s_start..s_end].trim().parse::<f32>().unwrap_or(DEFAULT_SCORE)
        }
        None => DEFAULT_SCORE,
    };
    Some((id, score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memcore_graph::{Node, NodeType, Source};

    #[test]
    fn formats_and_parses_roundtrip() {
        let mut node = Node::new(NodeType::Fact, "Dave handles Brightwell", Source::User);
        node.id = "abc123".to_string();
        node.salience = 0.8;
        let line = format_node_line(&node, Some(0.913));
        assert_eq!(line, "[fact] Dave handles Brightwell (id: abc123, salience: 0.8) [score: 0.9130]");

        let (id, score) = parse_result_line(&line).unwrap();
        assert_eq!(id, "abc123");
        assert!((score - 0.913).abs() < 1e-3);
    }

    #[test]
    fn missing_score_defaults_to_half() {
        let mut node = Node::new(NodeType::Entity, "Peter", Source::User);
        node.id = "e1".to_string();
        let line = format_node_line(&node, None);
        let (id, score) = parse_result_line(&line).unwrap();
        assert_eq!(id, "e1");
        assert_eq!(score, DEFAULT_SCORE);
    }

    #[test]
    fn non_result_lines_parse_to_none() {
        assert!(parse_result_line("done").is_none());
        assert!(parse_result_line("Error: missing parameter").is_none());
    }
}
