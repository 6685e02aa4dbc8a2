//! Plan and apply output analysis.
//!
//! Turns human-readable plan/apply text, or `show -json` plan output, into a
//! [`PlanAnalysis`]. Text analysis never fails: anything it does not
//! recognize is skipped.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IacError, IacResult};

/// Warning recorded when the output carries no summary line.
pub const MISSING_SUMMARY_WARNING: &str = "No plan summary found in output";

/// Kind of change planned for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Replace,
    Read,
    NoOp,
}

impl ChangeKind {
    fn from_glyph(glyph: &str) -> Option<Self> {
        match glyph {
            "+" => Some(Self::Create),
            "~" => Some(Self::Update),
            "-" => Some(Self::Delete),
            "-/+" | "+/-" => Some(Self::Replace),
            "<=" => Some(Self::Read),
            _ => None,
        }
    }

    fn from_phrase(phrase: &str) -> Option<Self> {
        match phrase {
            "will be created" => Some(Self::Create),
            "will be updated in-place" => Some(Self::Update),
            "will be destroyed" => Some(Self::Delete),
            "will be replaced" | "must be replaced" | "is tainted, so must be replaced" => {
                Some(Self::Replace)
            }
            "will be read during apply" => Some(Self::Read),
            _ => None,
        }
    }

    fn from_actions(actions: &[String]) -> Option<Self> {
        let has = |a: &str| actions.iter().any(|x| x == a);
        if has("delete") && has("create") {
            return Some(Self::Replace);
        }
        match actions.first().map(String::as_str) {
            Some("create") => Some(Self::Create),
            Some("update") => Some(Self::Update),
            Some("delete") => Some(Self::Delete),
            Some("read") => Some(Self::Read),
            Some("no-op") => Some(Self::NoOp),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::Read => "read",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// One planned resource change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub address: String,
    pub kind: ChangeKind,
}

/// Summary counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub add: u32,
    pub change: u32,
    pub destroy: u32,
}

impl ChangeCounts {
    pub fn new(add: u32, change: u32, destroy: u32) -> Self {
        Self { add, change, destroy }
    }

    pub fn total(&self) -> u32 {
        self.add.saturating_add(self.change).saturating_add(self.destroy)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for ChangeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to destroy",
            self.add, self.change, self.destroy
        )
    }
}

/// Structured view of a plan or apply run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAnalysis {
    pub resource_changes: Vec<ResourceChange>,
    pub counts: ChangeCounts,
    /// One-line digest
    pub summary: String,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl PlanAnalysis {
    pub fn has_changes(&self) -> bool {
        !self.counts.is_empty()
    }

    /// Changes of one kind.
    pub fn changes_of(&self, kind: ChangeKind) -> impl Iterator<Item = &ResourceChange> {
        self.resource_changes.iter().filter(move |c| c.kind == kind)
    }

    fn push_change(&mut self, seen: &mut HashSet<String>, address: String, kind: ChangeKind) {
        if seen.insert(address.clone()) {
            self.resource_changes.push(ResourceChange { address, kind });
        }
    }
}

struct Patterns {
    ansi: Regex,
    plan: Regex,
    applied: Regex,
    destroyed: Regex,
    header: Regex,
    block: Regex,
    bare: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                ansi: Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok()?,
                plan: Regex::new(
                    r"Plan:\s+(?:\d+\s+to import,\s+)?(\d+)\s+to add,\s+(\d+)\s+to change,\s+(\d+)\s+to destroy",
                )
                .ok()?,
                applied: Regex::new(
                    r"Apply complete!\s+Resources:\s+(?:\d+\s+imported,\s+)?(\d+)\s+added,\s+(\d+)\s+changed,\s+(\d+)\s+destroyed",
                )
                .ok()?,
                destroyed: Regex::new(r"Destroy complete!\s+Resources:\s+(\d+)\s+destroyed").ok()?,
                header: Regex::new(
                    r"^\s*#\s+(.+?)\s+(will be created|will be updated in-place|will be destroyed|will be replaced|will be read during apply|is tainted, so must be replaced|must be replaced)",
                )
                .ok()?,
                block: Regex::new(r#"^\s*(-/\+|\+/-|<=|\+|~|-)\s+(resource|data)\s+"([^"]+)"\s+"([^"]+)""#)
                    .ok()?,
                bare: Regex::new(
                    r"^\s*(-/\+|\+/-|<=|\+|~|-)\s+((?:module\.[\w-]+(?:\[[^\]]*\])?\.)*(?:data\.)?[A-Za-z_][\w-]*\.[\w-]+(?:\[[^\]]*\])?)\s*$",
                )
                .ok()?,
            })
        })
        .as_ref()
}

/// Read a summary count, clamping values that do not fit and noting them.
fn capture_count(caps: &regex::Captures<'_>, index: usize, warnings: &mut Vec<String>) -> u32 {
    let Some(m) = caps.get(index) else {
        return 0;
    };
    match m.as_str().parse() {
        Ok(n) => n,
        Err(_) => {
            warnings.push(format!(
                "Change count {} is out of range, reported as {}",
                m.as_str(),
                u32::MAX
            ));
            u32::MAX
        }
    }
}

fn capture_counts(caps: &regex::Captures<'_>, warnings: &mut Vec<String>) -> ChangeCounts {
    ChangeCounts::new(
        capture_count(caps, 1, warnings),
        capture_count(caps, 2, warnings),
        capture_count(caps, 3, warnings),
    )
}

/// Strip diagnostic box drawing from the start of a line.
fn strip_box(line: &str) -> &str {
    line.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '│' | '╷' | '╵' | '|'))
        .trim_end()
}

/// Analyze plan or apply text output.
pub fn analyze_text(output: &str) -> PlanAnalysis {
    let mut analysis = PlanAnalysis::default();
    let Some(p) = patterns() else {
        analysis.summary = MISSING_SUMMARY_WARNING.to_string();
        analysis.warnings.push(MISSING_SUMMARY_WARNING.to_string());
        return analysis;
    };

    let cleaned = p.ansi.replace_all(output, "");
    let mut seen = HashSet::new();
    let mut counts: Option<ChangeCounts> = None;
    let mut no_changes = false;
    // A `# addr will be ...` header is followed by a `+ resource "t" "n"` line
    // describing the same resource without its module path.
    let mut header_pending = false;

    for line in cleaned.lines() {
        if let Some(caps) = p.plan.captures(line) {
            counts = Some(capture_counts(&caps, &mut analysis.warnings));
            continue;
        }
        if let Some(caps) = p.applied.captures(line) {
            counts = Some(capture_counts(&caps, &mut analysis.warnings));
            continue;
        }
        if let Some(caps) = p.destroyed.captures(line) {
            let destroyed = capture_count(&caps, 1, &mut analysis.warnings);
            counts = Some(ChangeCounts::new(0, 0, destroyed));
            continue;
        }
        if line.trim_start().starts_with("No changes.") {
            no_changes = true;
            continue;
        }

        if let Some(caps) = p.header.captures(line) {
            if let Some(kind) = ChangeKind::from_phrase(&caps[2]) {
                analysis.push_change(&mut seen, caps[1].to_string(), kind);
                header_pending = true;
            }
            continue;
        }
        if let Some(caps) = p.block.captures(line) {
            if header_pending {
                header_pending = false;
                continue;
            }
            if let Some(kind) = ChangeKind::from_glyph(&caps[1]) {
                let address = if &caps[2] == "data" {
                    format!("data.{}.{}", &caps[3], &caps[4])
                } else {
                    format!("{}.{}", &caps[3], &caps[4])
                };
                analysis.push_change(&mut seen, address, kind);
            }
            continue;
        }
        if let Some(caps) = p.bare.captures(line) {
            if let Some(kind) = ChangeKind::from_glyph(&caps[1]) {
                analysis.push_change(&mut seen, caps[2].to_string(), kind);
            }
            continue;
        }

        let stripped = strip_box(line);
        if stripped.starts_with("Warning:") {
            analysis.warnings.push(stripped.to_string());
        } else if stripped.starts_with("Error:") {
            analysis.errors.push(stripped.to_string());
        }
    }

    match counts {
        Some(counts) => {
            analysis.counts = counts;
            analysis.summary = counts.to_string();
        }
        None if no_changes => {
            analysis.summary = "No changes".to_string();
        }
        None => {
            analysis.summary = MISSING_SUMMARY_WARNING.to_string();
            analysis.warnings.push(MISSING_SUMMARY_WARNING.to_string());
        }
    }

    analysis
}

#[derive(Debug, Deserialize)]
struct JsonPlan {
    #[serde(default)]
    resource_changes: Vec<JsonResourceChange>,
}

#[derive(Debug, Deserialize)]
struct JsonResourceChange {
    address: String,
    change: JsonChange,
}

#[derive(Debug, Deserialize)]
struct JsonChange {
    #[serde(default)]
    actions: Vec<String>,
}

/// Analyze `show -json <planfile>` output.
pub fn analyze_plan_json(json: &str) -> IacResult<PlanAnalysis> {
    let plan: JsonPlan = serde_json::from_str(json)
        .map_err(|e| IacError::InvalidOutput(format!("plan JSON: {}", e)))?;

    let mut analysis = PlanAnalysis::default();
    let mut seen = HashSet::new();

    for rc in plan.resource_changes {
        let Some(kind) = ChangeKind::from_actions(&rc.change.actions) else {
            continue;
        };
        match kind {
            ChangeKind::Create => analysis.counts.add += 1,
            ChangeKind::Update => analysis.counts.change += 1,
            ChangeKind::Delete => analysis.counts.destroy += 1,
            ChangeKind::Replace => {
                analysis.counts.add += 1;
                analysis.counts.destroy += 1;
            }
            ChangeKind::Read | ChangeKind::NoOp => {}
        }
        analysis.push_change(&mut seen, rc.address, kind);
    }

    analysis.summary = if analysis.counts.is_empty() {
        "No changes".to_string()
    } else {
        analysis.counts.to_string()
    };
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_OUTPUT: &str = r#"
Terraform used the selected providers to generate the following execution
plan. Resource actions are indicated with the following symbols:
  + create
  ~ update in-place
-/+ destroy and then create replacement

Terraform will perform the following actions:

  # aws_instance.web will be created
  + resource "aws_instance" "web" {
      + ami           = "ami-123456"
      + instance_type = "t3.micro"
    }

  # module.net.aws_subnet.a["eu-west-1a"] will be updated in-place
  ~ resource "aws_subnet" "a" {
      ~ tags = {
          + "Team" = "core"
        }
    }

  # aws_db_instance.main must be replaced
-/+ resource "aws_db_instance" "main" {
      ~ engine_version = "13" -> "15" # forces replacement
    }

  # aws_s3_bucket.logs will be created
  + resource "aws_s3_bucket" "logs" {
      + bucket = "logs"
    }

Plan: 3 to add, 1 to change, 0 to destroy.
"#;

    #[test]
    fn test_plan_summary_counts() {
        let analysis = analyze_text(PLAN_OUTPUT);
        assert_eq!(analysis.counts, ChangeCounts::new(3, 1, 0));
        assert_eq!(analysis.summary, "3 to add, 1 to change, 0 to destroy");
        assert!(analysis.errors.is_empty());
        assert!(analysis.warnings.is_empty());
    }

    #[test]
    fn test_resource_changes_from_headers() {
        let analysis = analyze_text(PLAN_OUTPUT);
        let changes: Vec<(&str, ChangeKind)> = analysis
            .resource_changes
            .iter()
            .map(|c| (c.address.as_str(), c.kind))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("aws_instance.web", ChangeKind::Create),
                ("module.net.aws_subnet.a[\"eu-west-1a\"]", ChangeKind::Update),
                ("aws_db_instance.main", ChangeKind::Replace),
                ("aws_s3_bucket.logs", ChangeKind::Create),
            ]
        );
        assert_eq!(analysis.changes_of(ChangeKind::Create).count(), 2);
    }

    #[test]
    fn test_missing_summary_warns() {
        let analysis = analyze_text("Initializing the backend...\nsomething else\n");
        assert_eq!(analysis.counts, ChangeCounts::default());
        assert_eq!(analysis.warnings, vec![MISSING_SUMMARY_WARNING.to_string()]);
        assert!(!analysis.has_changes());
    }

    #[test]
    fn test_huge_counts_do_not_overflow() {
        let analysis =
            analyze_text("Plan: 4294967295 to add, 4294967295 to change, 1 to destroy.\n");
        assert_eq!(analysis.counts.add, u32::MAX);
        assert_eq!(analysis.counts.total(), u32::MAX);
        assert!(analysis.has_changes());
        assert!(analysis.warnings.is_empty());
    }

    #[test]
    fn test_out_of_range_count_is_reported() {
        let analysis = analyze_text("Plan: 99999999999 to add, 0 to change, 0 to destroy.\n");
        assert_eq!(analysis.counts.add, u32::MAX);
        assert_eq!(analysis.warnings.len(), 1);
        assert!(analysis.warnings[0].contains("99999999999"));
        assert!(analysis.errors.is_empty());
    }

    #[test]
    fn test_empty_output() {
        let analysis = analyze_text("");
        assert!(analysis.resource_changes.is_empty());
        assert!(!analysis.warnings.is_empty());
    }

    #[test]
    fn test_no_changes_is_explicit_zero() {
        let analysis = analyze_text(
            "No changes. Your infrastructure matches the configuration.\n",
        );
        assert_eq!(analysis.counts, ChangeCounts::default());
        assert!(analysis.warnings.is_empty());
        assert_eq!(analysis.summary, "No changes");
    }

    #[test]
    fn test_apply_complete_wins_over_plan_line() {
        let output = "Plan: 2 to add, 0 to change, 1 to destroy.\n\
                      aws_instance.web: Creating...\n\
                      Apply complete! Resources: 2 added, 0 changed, 1 destroyed.\n";
        assert_eq!(analyze_text(output).counts, ChangeCounts::new(2, 0, 1));
    }

    #[test]
    fn test_destroy_complete() {
        let analysis = analyze_text("Destroy complete! Resources: 7 destroyed.\n");
        assert_eq!(analysis.counts, ChangeCounts::new(0, 0, 7));
    }

    #[test]
    fn test_plan_with_imports() {
        let analysis = analyze_text("Plan: 1 to import, 2 to add, 0 to change, 0 to destroy.");
        assert_eq!(analysis.counts, ChangeCounts::new(2, 0, 0));
    }

    #[test]
    fn test_bare_glyph_lines_deduplicated() {
        let output = "\
  + aws_instance.web
  ~ module.app.aws_lambda_function.handler
  -/+ aws_eip.ip
  <= data.aws_ami.ubuntu
  - aws_instance.web
  + ami = \"ami-1\"
Plan: 2 to add, 1 to change, 1 to destroy.";
        let analysis = analyze_text(output);
        let changes: Vec<(&str, ChangeKind)> = analysis
            .resource_changes
            .iter()
            .map(|c| (c.address.as_str(), c.kind))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("aws_instance.web", ChangeKind::Create),
                ("module.app.aws_lambda_function.handler", ChangeKind::Update),
                ("aws_eip.ip", ChangeKind::Replace),
                ("data.aws_ami.ubuntu", ChangeKind::Read),
            ]
        );
    }

    #[test]
    fn test_block_lines_without_headers() {
        let output = "  + resource \"aws_vpc\" \"main\" {\n  <= data \"aws_region\" \"current\" {\n";
        let analysis = analyze_text(output);
        assert_eq!(analysis.resource_changes.len(), 2);
        assert_eq!(analysis.resource_changes[0].address, "aws_vpc.main");
        assert_eq!(analysis.resource_changes[1].address, "data.aws_region.current");
        assert_eq!(analysis.resource_changes[1].kind, ChangeKind::Read);
    }

    #[test]
    fn test_diagnostics_in_boxes() {
        let output = "\
╷
│ Warning: Argument is deprecated
│
│   with aws_s3_bucket.logs,
╵
╷
│ Error: Unsupported argument
╵
Warning: plain warning line
";
        let analysis = analyze_text(output);
        assert_eq!(
            analysis.warnings,
            vec![
                "Warning: Argument is deprecated".to_string(),
                "Warning: plain warning line".to_string(),
                MISSING_SUMMARY_WARNING.to_string(),
            ]
        );
        assert_eq!(analysis.errors, vec!["Error: Unsupported argument".to_string()]);
    }

    #[test]
    fn test_ansi_colors_ignored() {
        let output = "\x1b[1mPlan:\x1b[0m 1 to add, 0 to change, 0 to destroy.";
        assert_eq!(analyze_text(output).counts, ChangeCounts::new(1, 0, 0));
    }

    #[test]
    fn test_plan_json() {
        let json = r#"{
            "format_version": "1.2",
            "resource_changes": [
                {"address": "aws_instance.web", "change": {"actions": ["create"]}},
                {"address": "aws_s3_bucket.logs", "change": {"actions": ["update"]}},
                {"address": "aws_eip.ip", "change": {"actions": ["delete", "create"]}},
                {"address": "aws_iam_role.old", "change": {"actions": ["delete"]}},
                {"address": "data.aws_ami.ubuntu", "change": {"actions": ["read"]}},
                {"address": "aws_vpc.main", "change": {"actions": ["no-op"]}}
            ]
        }"#;
        let analysis = analyze_plan_json(json).unwrap();
        assert_eq!(analysis.counts, ChangeCounts::new(2, 1, 2));
        assert_eq!(analysis.resource_changes.len(), 6);
        assert_eq!(analysis.resource_changes[2].kind, ChangeKind::Replace);
        assert_eq!(analysis.resource_changes[5].kind, ChangeKind::NoOp);
    }

    #[test]
    fn test_plan_json_without_changes() {
        let analysis = analyze_plan_json(r#"{"format_version": "1.2"}"#).unwrap();
        assert!(analysis.resource_changes.is_empty());
        assert_eq!(analysis.summary, "No changes");
    }

    #[test]
    fn test_plan_json_invalid() {
        let result = analyze_plan_json("not json");
        assert!(matches!(result, Err(IacError::InvalidOutput(_))));
    }
}
