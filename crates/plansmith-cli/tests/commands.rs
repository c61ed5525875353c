//! `validate` and `simulate` over files on disk

use plansmith_cli::{render_snapshot, simulate, validate, SimulateOptions};
use plansmith_jobs::JobStatus;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DEFINITIONS: &str = r#"
agents:
  - id: extract
    role: actor
    model: small
    user_prompt: "Requirements of {{section_title}}:\n{{section_text}}"
    max_output_tokens: 256
  - id: review
    role: critic
    model: large
    user_prompt: "{{previous}}\n\nEarlier:\n{{rolling_summary}}"
    max_output_tokens: 1024
    output_schema:
      type: array
      items:
        type: object
        required: [id, title]
pipelines:
  - id: standard
    name: Standard
    is_default: true
    stages:
      - name: extract
        agents: [extract]
      - name: review
        agents: [review]
  - id: extract-only
    name: Extraction only
    stages:
      - name: extract
        agents: [extract]
"#;

const SECTIONS: &str = r#"[
  {"id": "3.1", "index": 0, "text": "The pump shall start within 2 s.", "metadata": {"title": "Start-up"}},
  {"id": "3.2", "index": 1, "text": "The pump shall stop on fault."}
]"#;

fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn options(dir: &TempDir, definitions: &str) -> SimulateOptions {
    SimulateOptions {
        definitions: write(dir, "definitions.yaml", definitions),
        sections: write(dir, "sections.json", SECTIONS),
        ..SimulateOptions::default()
    }
}

#[test]
fn validate_reports_pipelines() {
    let dir = TempDir::new().unwrap();
    let report = validate(&write(&dir, "definitions.yaml", DEFINITIONS)).unwrap();

    assert_eq!(report.agents, 2);
    assert_eq!(
        report.pipelines,
        vec![("extract-only".to_string(), 1), ("standard".to_string(), 2)]
    );
    assert_eq!(report.default_pipeline.as_deref(), Some("standard"));
    assert!(report.render().contains("standard: 2 stages (default)"));
}

#[test]
fn validate_rejects_second_default() {
    let dir = TempDir::new().unwrap();
    let doubled = DEFINITIONS.replace("    name: Extraction only\n", "    name: Extraction only\n    is_default: true\n");
    let err = validate(&write(&dir, "definitions.yaml", &doubled)).unwrap_err();
    assert!(err.to_string().contains("default"));
}

#[test]
fn validate_rejects_dangling_agent() {
    let dir = TempDir::new().unwrap();
    let dangling = DEFINITIONS.replace("agents: [review]", "agents: [ghost]");
    let err = validate(&write(&dir, "definitions.yaml", &dangling)).unwrap_err();
    assert!(format!("{err:#}").contains("ghost"));
}

#[test]
fn validate_reports_missing_file() {
    assert!(validate(Path::new("/nonexistent/definitions.yaml")).is_err());
}

#[tokio::test]
async fn simulate_runs_default_pipeline() {
    let dir = TempDir::new().unwrap();
    let snapshot = simulate(&options(&dir, DEFINITIONS)).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.committed_version, Some(1));
    let result = snapshot.result.as_ref().unwrap();
    assert_eq!(result.sections.len(), 2);
    assert_eq!(result.totals.procedure_count, 2);
    assert_eq!(result.sections[0].title, "Start-up");

    let text = render_snapshot(&snapshot);
    assert!(text.contains("completed"));
    assert!(text.contains("[3.1] Start-up - 1 procedures, ok"));
}

#[tokio::test]
async fn simulate_named_pipeline_with_config() {
    let dir = TempDir::new().unwrap();
    let mut opts = options(&dir, DEFINITIONS);
    opts.pipeline = Some("extract-only".into());
    opts.config = Some(write(&dir, "engine.toml", "max_fan_out = 2\ncall_timeout_secs = 5\n"));

    let snapshot = simulate(&opts).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    let result = snapshot.result.unwrap();
    assert_eq!(result.totals.procedure_count, 0);
    assert!(result.sections.iter().all(|s| !s.failed));

    let json = serde_json::to_value(&snapshot.status).unwrap();
    assert_eq!(json, "completed");
}

#[tokio::test]
async fn simulate_rejects_unknown_pipeline() {
    let dir = TempDir::new().unwrap();
    let mut opts = options(&dir, DEFINITIONS);
    opts.pipeline = Some("missing".into());
    let err = simulate(&opts).await.unwrap_err();
    assert!(err.to_string().contains("pipeline not found"));
}

#[tokio::test]
async fn simulate_needs_a_pipeline() {
    let dir = TempDir::new().unwrap();
    let no_default = DEFINITIONS.replace("    is_default: true\n", "");
    let err = simulate(&options(&dir, &no_default)).await.unwrap_err();
    assert!(err.to_string().contains("no default pipeline"));
}
