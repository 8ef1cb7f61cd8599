use anyhow::{Context, Result as AnyhowResult};
use clap::Parser;
use markup_index::config::Config;
use markup_index::model::document::TextDocument;
use markup_index::model::highlighter::{
    HighlighterHandle, HighlighterId, HighlighterInfo, TargetArea, TextAttributes,
};
use markup_index::model::markup_model::MarkupModel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Replay a script of highlighter operations against a document
#[derive(Parser, Debug)]
#[command(name = "markup-replay")]
#[command(about = "Replay highlighter operations and print overlap queries as JSON", long_about = None)]
#[command(version)]
struct Args {
    /// Text document the highlighters decorate
    #[arg(value_name = "DOCUMENT", required_unless_present_any = ["dump_config", "schema"])]
    document: Option<PathBuf>,

    /// JSON array of operations to apply in order
    #[arg(value_name = "SCRIPT", required_unless_present_any = ["dump_config", "schema"])]
    script: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "markup_index=trace" (default: RUST_LOG, then "warn")
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    schema: bool,
}

fn default_target() -> TargetArea {
    TargetArea::ExactRange
}

/// One step of a replay script
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ScriptOp {
    AddRange {
        label: String,
        start: usize,
        end: usize,
        #[serde(default)]
        layer: i32,
        #[serde(default = "default_target")]
        target: TargetArea,
        #[serde(default)]
        greedy_left: bool,
        #[serde(default)]
        greedy_right: bool,
        #[serde(default)]
        attributes: TextAttributes,
    },
    AddLine {
        label: String,
        line: usize,
        #[serde(default)]
        layer: i32,
        #[serde(default)]
        attributes: TextAttributes,
    },
    AddPersistentLine {
        label: String,
        line: usize,
        #[serde(default)]
        layer: i32,
        #[serde(default)]
        attributes: TextAttributes,
    },
    Remove {
        label: String,
    },
    /// Replace `[start, end)` with `text`
    Edit {
        start: usize,
        end: usize,
        #[serde(default)]
        text: String,
    },
    Query {
        start: usize,
        end: usize,
    },
    /// Set the attributes of every highlighter on `layer`
    ChangeLayerAttrs {
        layer: i32,
        attributes: TextAttributes,
    },
    RemoveAll,
}

#[derive(Debug, Serialize)]
struct QueryHit {
    label: Option<String>,
    id: u64,
    start: usize,
    end: usize,
    affected_start: usize,
    layer: i32,
    target: TargetArea,
}

#[derive(Debug, Serialize)]
struct QueryOutput {
    query: [usize; 2],
    highlighters: Vec<QueryHit>,
}

/// Applies script operations and remembers which label names which highlighter
struct Replay {
    model: MarkupModel<TextDocument>,
    handles: HashMap<String, HighlighterHandle>,
    labels: HashMap<HighlighterId, String>,
}

impl Replay {
    fn new(model: MarkupModel<TextDocument>) -> Self {
        Self {
            model,
            handles: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    fn remember(&mut self, label: String, handle: HighlighterHandle) {
        self.labels.insert(handle.id(), label.clone());
        self.handles.insert(label, handle);
    }

    fn hit(&self, info: &HighlighterInfo) -> QueryHit {
        QueryHit {
            label: self.labels.get(&info.id()).cloned(),
            id: info.id().0,
            start: info.interval.start,
            end: info.interval.end,
            affected_start: info.affected_start,
            layer: info.layer(),
            target: info.handle.target_area(),
        }
    }

    fn apply(&mut self, op: ScriptOp, out: &mut impl Write) -> AnyhowResult<()> {
        match op {
            ScriptOp::AddRange {
                label,
                start,
                end,
                layer,
                target,
                greedy_left,
                greedy_right,
                attributes,
            } => {
                let handle = self
                    .model
                    .add_range_highlighter_with_greedy(
                        start,
                        end,
                        greedy_left,
                        greedy_right,
                        layer,
                        attributes,
                        target,
                    )
                    .with_context(|| format!("Failed to add highlighter '{}'", label))?;
                self.remember(label, handle);
            }
            ScriptOp::AddLine {
                label,
                line,
                layer,
                attributes,
            } => {
                let handle = self
                    .model
                    .add_line_highlighter(line, layer, attributes)
                    .with_context(|| format!("Failed to add line highlighter '{}'", label))?;
                self.remember(label, handle);
            }
            ScriptOp::AddPersistentLine {
                label,
                line,
                layer,
                attributes,
            } => match self
                .model
                .add_persistent_line_highlighter(line, layer, attributes)
            {
                Some(handle) => self.remember(label, handle),
                None => tracing::warn!("Line {} is out of bounds, skipping '{}'", line, label),
            },
            ScriptOp::Remove { label } => {
                let handle = self
                    .handles
                    .remove(&label)
                    .with_context(|| format!("Unknown highlighter label '{}'", label))?;
                self.labels.remove(&handle.id());
                if !self.model.remove_highlighter(handle) {
                    tracing::warn!("Highlighter '{}' was already gone", label);
                }
            }
            ScriptOp::Edit { start, end, text } => {
                let change = self
                    .model
                    .document_mut()
                    .replace(start..end, &text)
                    .context("Failed to edit document")?;
                self.model.document_changed(change);
            }
            ScriptOp::Query { start, end } => {
                let highlighters = self
                    .model
                    .overlapping_iter(start, end)
                    .map(|info| self.hit(&info))
                    .collect();
                let output = QueryOutput {
                    query: [start, end],
                    highlighters,
                };
                writeln!(out, "{}", serde_json::to_string(&output)?)?;
            }
            ScriptOp::ChangeLayerAttrs { layer, attributes } => {
                let on_layer: Vec<HighlighterHandle> = self
                    .model
                    .all_highlighters()
                    .iter()
                    .filter(|info| info.layer() == layer)
                    .map(|info| info.handle)
                    .collect();
                for handle in on_layer {
                    self.model
                        .set_range_highlighter_attributes(handle, attributes.clone())?;
                }
            }
            ScriptOp::RemoveAll => {
                self.model.remove_all_highlighters();
                self.handles.clear();
                self.labels.clear();
            }
        }
        Ok(())
    }
}

fn init_tracing(log_level: Option<&str>, log_file: Option<&Path>) -> AnyhowResult<()> {
    let filter = match log_level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid log filter '{}'", directives))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> AnyhowResult<Config> {
    match path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn main() -> AnyhowResult<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref(), args.log_file.as_deref())?;

    if args.schema {
        println!("{}", Config::json_schema()?);
        return Ok(());
    }

    let config = load_config(args.config.as_deref())?;
    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let (Some(document_path), Some(script_path)) = (&args.document, &args.script) else {
        anyhow::bail!("Both DOCUMENT and SCRIPT are required");
    };

    let text = std::fs::read_to_string(document_path)
        .with_context(|| format!("Failed to read document {}", document_path.display()))?;
    let script = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script {}", script_path.display()))?;
    let ops: Vec<ScriptOp> = serde_json::from_str(&script)
        .with_context(|| format!("Failed to parse script {}", script_path.display()))?;

    tracing::info!(
        "Replaying {} operations over {} bytes",
        ops.len(),
        text.len()
    );

    let mut replay = Replay::new(MarkupModel::with_config(
        TextDocument::new(text),
        config.markup,
    ));
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (step, op) in ops.into_iter().enumerate() {
        replay
            .apply(op, &mut out)
            .with_context(|| format!("Script step {} failed", step))?;
    }

    tracing::info!("Replay finished with {} highlighters", replay.model.len());
    replay.model.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use markup_index::model::highlighter::Color;
    use serde_json::Value;

    /// "alpha" is [0, 5), "beta" is [6, 10), "gamma" is [11, 16)
    fn replay() -> Replay {
        Replay::new(MarkupModel::new(TextDocument::new("alpha\nbeta\ngamma\n")))
    }

    /// Apply a JSON script, returning one parsed value per query line
    fn run(replay: &mut Replay, script: &str) -> Vec<Value> {
        let ops: Vec<ScriptOp> = serde_json::from_str(script).unwrap();
        let mut out = Vec::new();
        for op in ops {
            replay.apply(op, &mut out).unwrap();
        }
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn labels_and_starts(output: &Value) -> Vec<(String, u64)> {
        output["highlighters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|hit| {
                (
                    hit["label"].as_str().unwrap().to_string(),
                    hit["start"].as_u64().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_queries_follow_edits_and_removals() {
        let mut replay = replay();
        let output = run(
            &mut replay,
            r#"[
                {"op": "add_range", "label": "word", "start": 0, "end": 3},
                {"op": "add_line", "label": "second", "line": 1, "layer": 2},
                {"op": "query", "start": 0, "end": 20},
                {"op": "edit", "start": 0, "end": 0, "text": "XX"},
                {"op": "query", "start": 0, "end": 20},
                {"op": "query", "start": 14, "end": 15},
                {"op": "remove", "label": "word"},
                {"op": "query", "start": 0, "end": 20}
            ]"#,
        );

        assert_eq!(output.len(), 4);
        assert_eq!(output[0]["query"], serde_json::json!([0, 20]));
        assert_eq!(
            labels_and_starts(&output[0]),
            vec![("word".to_string(), 0), ("second".to_string(), 6)]
        );
        let line_hit = &output[0]["highlighters"][1];
        assert_eq!(line_hit["target"], "lines_in_range");
        assert_eq!(line_hit["layer"], 2);
        assert_eq!(line_hit["affected_start"], 6);

        assert_eq!(
            labels_and_starts(&output[1]),
            vec![("word".to_string(), 2), ("second".to_string(), 8)]
        );
        assert!(output[2]["highlighters"].as_array().unwrap().is_empty());
        assert_eq!(
            labels_and_starts(&output[3]),
            vec![("second".to_string(), 8)]
        );
    }

    #[test]
    fn test_layer_attributes_and_remove_all() {
        let mut replay = replay();
        let output = run(
            &mut replay,
            r#"[
                {"op": "add_range", "label": "a", "start": 0, "end": 5, "layer": 1},
                {"op": "add_range", "label": "b", "start": 6, "end": 10, "layer": 3,
                 "target": "lines_in_range"},
                {"op": "add_persistent_line", "label": "p", "line": 2},
                {"op": "add_persistent_line", "label": "missing", "line": 9},
                {"op": "change_layer_attrs", "layer": 1,
                 "attributes": {"background": [10, 20, 30]}}
            ]"#,
        );
        assert!(output.is_empty());
        assert_eq!(replay.model.len(), 3);
        assert!(!replay.handles.contains_key("missing"));

        let backgrounds: Vec<_> = replay
            .model
            .all_highlighters()
            .iter()
            .map(|info| (info.layer(), info.highlighter.style.attributes.background))
            .collect();
        assert!(backgrounds.contains(&(1, Some(Color(10, 20, 30)))));
        assert!(backgrounds.contains(&(3, None)));

        run(&mut replay, r#"[{"op": "remove_all"}]"#);
        assert!(replay.model.is_empty());
        assert!(replay.handles.is_empty());
        assert!(replay.labels.is_empty());
    }

    #[test]
    fn test_bad_steps_are_errors() {
        let mut replay = replay();
        let mut out = Vec::new();

        let unknown: ScriptOp = serde_json::from_str(r#"{"op": "remove", "label": "nope"}"#).unwrap();
        let err = replay.apply(unknown, &mut out).unwrap_err();
        assert!(err.to_string().contains("nope"));

        let past_end: ScriptOp =
            serde_json::from_str(r#"{"op": "add_range", "label": "x", "start": 3, "end": 99}"#)
                .unwrap();
        assert!(replay.apply(past_end, &mut out).is_err());

        let bad_edit: ScriptOp =
            serde_json::from_str(r#"{"op": "edit", "start": 50, "end": 60, "text": "z"}"#).unwrap();
        assert!(replay.apply(bad_edit, &mut out).is_err());

        assert!(serde_json::from_str::<ScriptOp>(r#"{"op": "explode"}"#).is_err());
        assert!(out.is_empty());
        assert!(replay.model.is_empty());
    }
}
