//! Text and JSON views of a finished replay.

use crate::replay::Replay;
use colored::Colorize;
use hierloom_model::{Hierarchy, PartId};
use hierloom_sync::{Entity, PartChange};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Serialize)]
pub struct Report {
    pub documents: Vec<DocumentReport>,
    pub events: Vec<EventReport>,
}

#[derive(Debug, Serialize)]
pub struct DocumentReport {
    pub name: String,
    pub parts: Vec<PartReport>,
}

#[derive(Debug, Serialize)]
pub struct PartReport {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, String>,
    /// Name of the archetype document this part is linked to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archetype: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PartReport>,
}

#[derive(Debug, Serialize)]
pub struct EventReport {
    pub document: String,
    pub part: String,
    pub change: PartChange,
    pub from_base: bool,
}

impl Report {
    pub fn from_replay(replay: &Replay) -> Self {
        let documents = replay
            .documents()
            .map(|(name, hierarchy)| DocumentReport {
                name: name.to_string(),
                parts: hierarchy
                    .root_ids()
                    .iter()
                    .filter_map(|id| part_report(replay, hierarchy, *id))
                    .collect(),
            })
            .collect();
        let events = replay
            .events()
            .into_iter()
            .map(|event| EventReport {
                document: replay
                    .document_name(event.document)
                    .map(str::to_string)
                    .unwrap_or_else(|| event.document.to_string()),
                part: replay
                    .part_name(event.part)
                    .map(str::to_string)
                    .unwrap_or_else(|| event.part.to_string()),
                change: event.change,
                from_base: event.from_base,
            })
            .collect();
        Self { documents, events }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for doc in &self.documents {
            let _ = writeln!(out, "{}", doc.name.bold());
            if doc.parts.is_empty() {
                let _ = writeln!(out, "  {}", "(empty)".dimmed());
            }
            for part in &doc.parts {
                write_part(&mut out, part, 1);
            }
        }
        let _ = writeln!(out, "{}", "events".bold());
        for (n, event) in self.events.iter().enumerate() {
            let change = match event.change {
                PartChange::Added => "added".green(),
                PartChange::Removed => "removed".red(),
            };
            let origin = if event.from_base {
                " (from base)".dimmed().to_string()
            } else {
                String::new()
            };
            let _ = writeln!(
                out,
                "  {:>3}. {} {} in {}{}",
                n + 1,
                change,
                event.part,
                event.document,
                origin
            );
        }
        out
    }
}

fn part_report(replay: &Replay, hierarchy: &Hierarchy<Entity>, id: PartId) -> Option<PartReport> {
    let design = hierarchy.get(id)?;
    Some(PartReport {
        name: design.part.name.clone(),
        components: design.part.components.clone(),
        archetype: design.base.map(|base| {
            replay
                .document_name(base.archetype)
                .map(str::to_string)
                .unwrap_or_else(|| base.archetype.to_string())
        }),
        overrides: design.overrides.iter().map(|p| p.to_string()).collect(),
        children: design
            .part
            .children
            .iter()
            .filter_map(|child| part_report(replay, hierarchy, *child))
            .collect(),
    })
}

fn write_part(out: &mut String, part: &PartReport, depth: usize) {
    let indent = "  ".repeat(depth);
    let mut line = format!("{indent}{}", part.name);
    if !part.overrides.is_empty() {
        line.push_str(&"*".yellow().to_string());
    }
    if !part.components.is_empty() {
        let components: Vec<String> = part
            .components
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        line.push_str(&format!(" [{}]", components.join(", ")).dimmed().to_string());
    }
    if let Some(archetype) = &part.archetype {
        line.push_str(&format!(" <- {archetype}").cyan().to_string());
    }
    let _ = writeln!(out, "{line}");
    for child in &part.children {
        write_part(out, child, depth + 1);
    }
}
