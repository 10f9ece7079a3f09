//! Assembler (spec §4.7) — turns every tool-result line the retrieve
//! pipeline produced into the five-section context string.

use std::collections::{HashMap, HashSet};

use memcore_graph::{Node, NodeType};

use crate::context::PipelineContext;
use crate::error::Result;
use crate::format::{format_node_line, parse_result_line};

const ENTITY_CAP: usize = 15;
const RELATIONSHIP_CAP: usize = 8;
const INSTRUCTION_CAP: usize = 15;
const FACT_CAP: usize = 30;
const EVENT_CAP: usize = 15;
const PLAN_CAP: usize = 10;
/// Absolute score gap within which instructions fall back to scope as a
/// tiebreaker (spec §4.7).
const INSTRUCTION_TIEBREAKER: f64 = 0.05;

#[derive(Debug, Default)]
pub struct Sections {
    pub entities: Option<String>,
    pub instructions: Option<String>,
    pub facts: Option<String>,
    pub events: Option<String>,
    pub plans: Option<String>,
}

impl Sections {
    /// Flatten into the fixed-heading single string (spec §4.7). Missing
    /// sections are omitted entirely.
    pub fn flatten(&self) -> String {
        let mut parts = Vec::new();
        if let Some(s) = &self.entities {
            parts.push(format!("People & things\n{s}"));
        }
        if let Some(s) = &self.instructions {
            parts.push(format!("Instructions\n{s}"));
        }
        if let Some(s) = &self.facts {
            parts.push(format!("Facts\n{s}"));
        }
        if let Some(s) = &self.events {
            parts.push(format!("Events\n{s}"));
        }
        if let Some(s) = &self.plans {
            parts.push(format!("Upcoming plans\n{s}"));
        }
        parts.join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_none()
            && self.instructions.is_none()
            && self.facts.is_none()
            && self.events.is_none()
            && self.plans.is_none()
    }
}

/// Resolve every `(id, score)` pair out of the raw result lines into live,
/// non-superseded nodes, keeping the max score on duplicate ids (spec
/// §4.7).
fn resolve_scored_nodes(ctx: &PipelineContext, lines: &[String]) -> Result<Vec<(Node, f64)>> {
    let mut best: HashMap<String, f32> = HashMap::new();
    for line in lines {
        if let Some((id, score)) = parse_result_line(line) {
            let entry = best.entry(id).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }
    }

    let mut out = Vec::with_capacity(best.len());
    for (id, score) in best {
        if let Some(node) = ctx.graph.get_node(&id)? {
            if node.superseded_by.is_none() {
                out.push((node, score as f64));
            }
        }
    }
    Ok(out)
}

/// Assemble the five-section context. `today` is an ISO `YYYY-MM-DD` date
/// used for plan auto-promotion.
pub fn assemble(ctx: &PipelineContext, lines: &[String], today: &str) -> Result<Sections> {
    let scored = resolve_scored_nodes(ctx, lines)?;

    let mut entities: Vec<(Node, f64)> = Vec::new();
    let mut instructions: Vec<(Node, f64)> = Vec::new();
    let mut facts_opinions: Vec<(Node, f64)> = Vec::new();
    let mut events: Vec<(Node, f64, Option<String>)> = Vec::new();
    let mut plans: Vec<(Node, f64)> = Vec::new();

    for (node, score) in scored {
        match node.node_type {
            NodeType::Entity => entities.push((node, score)),
            NodeType::Instruction => instructions.push((node, score)),
            NodeType::Fact | NodeType::Opinion => facts_opinions.push((node, score)),
            NodeType::Event => events.push((node, score, None)),
            NodeType::Plan => plans.push((node, score)),
        }
    }

    // Plan auto-promotion runs before sectioning events (spec §4.7).
    let mut remaining_plans = Vec::with_capacity(plans.len());
    for (node, score) in plans {
        let should_promote = node
            .valid_from
            .as_deref()
            .map(|vf| vf <= today)
            .unwrap_or(false);
        if should_promote {
            let promoted = ctx.graph.promote_plan_to_event(&node.id)?;
            let annotation = format!(
                "[Was scheduled for {} — now past]",
                node.valid_from.as_deref().unwrap_or("")
            );
            events.push((promoted, score, Some(annotation)));
        } else {
            remaining_plans.push((node, score));
        }
    }
    let plans = remaining_plans;

    entities.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    entities.truncate(ENTITY_CAP);

    instructions.sort_by(|a, b| {
        let score_diff = (a.1 - b.1).abs();
        if score_diff <= INSTRUCTION_TIEBREAKER {
            let a_scope = a.0.scope.unwrap_or(0.0);
            let b_scope = b.0.scope.unwrap_or(0.0);
            b_scope.partial_cmp(&a_scope).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        }
    });
    instructions.truncate(INSTRUCTION_CAP);

    facts_opinions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    facts_opinions.truncate(FACT_CAP);

    events.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    events.truncate(EVENT_CAP);

    let mut plans = plans;
    plans.sort_by(|a, b| a.0.valid_from.cmp(&b.0.valid_from));
    plans.truncate(PLAN_CAP);

    let mut assigned: HashSet<String> = HashSet::new();
    for (n, _) in &instructions {
        assigned.insert(n.id.clone());
    }
    for (n, _) in &facts_opinions {
        assigned.insert(n.id.clone());
    }
    for (n, _, _) in &events {
        assigned.insert(n.id.clone());
    }
    for (n, _) in &plans {
        assigned.insert(n.id.clone());
    }
    for (n, _) in &entities {
        assigned.insert(n.id.clone());
    }

    let entity_lines: Vec<String> = entities
        .iter()
        .map(|(node, score)| render_entity(ctx, node, *score, &assigned))
        .collect::<Result<Vec<_>>>()?;

    let instruction_lines: Vec<String> =
        instructions.iter().map(|(n, s)| format_node_line(n, Some(*s as f32))).collect();
    let fact_lines: Vec<String> =
        facts_opinions.iter().map(|(n, s)| format_node_line(n, Some(*s as f32))).collect();
    let event_lines: Vec<String> = events
        .iter()
        .map(|(n, s, annotation)| {
            let line = format_node_line(n, Some(*s as f32));
            match annotation {
                Some(a) => format!("{line} {a}"),
                None => line,
            }
        })
        .collect();
    let plan_lines: Vec<String> =
        plans.iter().map(|(n, s)| format_node_line(n, Some(*s as f32))).collect();

    Ok(Sections {
        entities: non_empty_join(entity_lines),
        instructions: non_empty_join(instruction_lines),
        facts: non_empty_join(fact_lines),
        events: non_empty_join(event_lines),
        plans: non_empty_join(plan_lines),
    })
}

fn non_empty_join(lines: Vec<String>) -> Option<String> {
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn render_entity(ctx: &PipelineContext, node: &Node, score: f64, assigned: &HashSet<String>) -> Result<String> {
    let mut line = format_node_line(node, Some(score as f32));
    let mut rels = ctx.graph.relationships(&node.id)?;
    rels.retain(|r| !assigned.contains(&r.far_node.id));
    rels.sort_by(|a, b| b.far_node.salience.partial_cmp(&a.far_node.salience).unwrap_or(std::cmp::Ordering::Equal));
    rels.truncate(RELATIONSHIP_CAP);
    for rel in &rels {
        line.push_str(&format!("\n  - {} ({})", format_node_line(&rel.far_node, None), rel.edge.edge_type));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memcore_graph::{GraphStore, NodeType, Source};
    use rusqlite::Connection;

    fn store() -> GraphStore {
        GraphStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn sections_flatten_skips_missing() {
        let sections = Sections { facts: Some("line1".into()), ..Default::default() };
        assert_eq!(sections.flatten(), "Facts\nline1");
    }

    #[test]
    fn plan_with_past_valid_from_promotes_to_event() {
        let graph = store();
        let ctx = PipelineContext::new(
            std::sync::Arc::new(graph),
            std::sync::Arc::new(crate::test_support::NoopEmbeddings),
            std::sync::Arc::new(crate::test_support::NoopChat),
            "test-model",
        );
        let mut plan = Node::new(NodeType::Plan, "Launch new content portal", Source::Assistant);
        plan.valid_from = Some("2024-01-01".to_string());
        let plan = ctx.graph.create_node(plan).unwrap();
        let line = format_node_line(&plan, Some(0.9));

        let sections = assemble(&ctx, &[line], "2024-06-01").unwrap();
        assert!(sections.plans.is_none());
        let events = sections.events.unwrap();
        assert!(events.contains("Was scheduled for 2024-01-01"));
        assert!(events.contains("Launch new content portal"));
    }

    #[test]
    fn instructions_cap_and_tiebreak_by_scope() {
        let graph = store();
        let ctx = PipelineContext::new(
            std::sync::Arc::new(graph),
            std::sync::Arc::new(crate::test_support::NoopEmbeddings),
            std::sync::Arc::new(crate::test_support::NoopChat),
            "test-model",
        );
        let mut narrow = Node::new(NodeType::Instruction, "Use metric units here", Source::User);
        narrow.scope = Some(0.2);
        let narrow = ctx.graph.create_node(narrow).unwrap();
        let mut broad = Node::new(NodeType::Instruction, "Always confirm before deleting", Source::User);
        broad.scope = Some(0.9);
        let broad = ctx.graph.create_node(broad).unwrap();

        let lines = vec![
            format_node_line(&narrow, Some(0.70)),
            format_node_line(&broad, Some(0.72)),
        ];
        let sections = assemble(&ctx, &lines, "2024-06-01").unwrap();
        let rendered = sections.instructions.unwrap();
        // within 0.05 of each other -> scope breaks the tie, broad wins
        assert!(rendered.find("Always confirm").unwrap() < rendered.find("Use metric").unwrap());
    }
}
