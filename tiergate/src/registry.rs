//! Check Registry: the static list of deep-tier checks
//!
//! Each entry pairs a `CheckDefinition` (id, category, applicability, default
//! timeout) with the adapter that runs it and the severity policy that grades
//! it. Registry order is the canonical order of checks in every report.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{
    BenchmarkAdapter, InferAdapter, PytestAdapter, RadonAdapter, SemgrepAdapter, ToolAdapter,
};
use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::policy::{PolicyTable, SeverityPolicy};
use crate::workspace::WorkspaceProfile;

/// Stable identifier of a check
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckId(Cow<'static, str>);

impl CheckId {
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const SEMANTIC_SCAN: CheckId = CheckId::from_static("semantic_scan");
pub const BUG_FINDER: CheckId = CheckId::from_static("bug_finder");
pub const INTEGRATION_TESTS: CheckId = CheckId::from_static("integration_tests");
pub const BENCHMARKS: CheckId = CheckId::from_static("benchmarks");
pub const COMPLEXITY: CheckId = CheckId::from_static("complexity");

/// Analyzed sources per check family
const SEMANTIC_EXTS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "go", "java", "rb", "php", "c", "cpp", "rs", "kt", "scala",
    "cs", "sh",
];
const BUG_FINDER_EXTS: &[&str] = &["java", "c", "cpp", "m"];
const BUILD_FILES: &[&str] = &[
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "Makefile",
    "CMakeLists.txt",
];
const PYTHON_EXTS: &[&str] = &["py"];

/// Kind of analysis a check performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    SemanticSecurity,
    InterproceduralBugs,
    IntegrationTests,
    Benchmarks,
    Complexity,
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SemanticSecurity => "semantic_security",
            Self::InterproceduralBugs => "interprocedural_bugs",
            Self::IntegrationTests => "integration_tests",
            Self::Benchmarks => "benchmarks",
            Self::Complexity => "complexity",
        };
        f.write_str(s)
    }
}

/// When a check applies to a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    Always,
    /// At least one file with one of these extensions
    SourcesOf(Vec<String>),
    /// At least one of these relative paths exists
    AnyPath(Vec<String>),
    AllOf(Vec<Applicability>),
    AnyOf(Vec<Applicability>),
}

impl Applicability {
    pub fn sources_of(exts: &[&str]) -> Self {
        Self::SourcesOf(exts.iter().map(|s| s.to_string()).collect())
    }

    pub fn any_path<S: AsRef<str>>(paths: &[S]) -> Self {
        Self::AnyPath(paths.iter().map(|s| s.as_ref().to_string()).collect())
    }

    /// `Ok(())` if the check applies, otherwise the skip reason
    pub fn evaluate(&self, profile: &WorkspaceProfile) -> Result<(), String> {
        match self {
            Self::Always => Ok(()),
            Self::SourcesOf(exts) => {
                let exts: Vec<&str> = exts.iter().map(String::as_str).collect();
                if profile.has_sources(&exts) {
                    Ok(())
                } else {
                    Err(format!("no applicable sources (.{})", exts.join(", .")))
                }
            }
            Self::AnyPath(paths) => {
                if paths.iter().any(|p| profile.has_path(p)) {
                    Ok(())
                } else {
                    Err(format!("none of {} found", paths.join(", ")))
                }
            }
            Self::AllOf(all) => all.iter().try_for_each(|a| a.evaluate(profile)),
            Self::AnyOf(any) => {
                let mut reasons = Vec::new();
                for a in any {
                    match a.evaluate(profile) {
                        Ok(()) => return Ok(()),
                        Err(reason) => reasons.push(reason),
                    }
                }
                Err(reasons.join("; "))
            }
        }
    }
}

impl fmt::Display for Applicability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |items: &[Applicability], sep: &str| {
            items
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            Self::Always => f.write_str("always"),
            Self::SourcesOf(exts) => write!(f, "sources(.{})", exts.join("|.")),
            Self::AnyPath(paths) => write!(f, "path({})", paths.join("|")),
            Self::AllOf(all) => write!(f, "({})", join(all, " and ")),
            Self::AnyOf(any) => write!(f, "({})", join(any, " or ")),
        }
    }
}

/// Static description of one check
#[derive(Debug, Clone)]
pub struct CheckDefinition {
    pub id: CheckId,
    pub name: String,
    pub category: CheckCategory,
    pub applicability: Applicability,
    pub default_timeout: Duration,
}

/// A definition with the adapter and policy bound to it
#[derive(Clone)]
pub struct RegisteredCheck {
    pub definition: CheckDefinition,
    pub adapter: Arc<dyn ToolAdapter>,
    pub policy: SeverityPolicy,
}

impl RegisteredCheck {
    pub fn id(&self) -> &CheckId {
        &self.definition.id
    }
}

impl fmt::Debug for RegisteredCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCheck")
            .field("definition", &self.definition)
            .field("tool", &self.adapter.tool())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Which checks a run executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    All,
    Single(CheckId),
}

impl RunMode {
    /// Parse `all` or a registered check id
    pub fn parse(registry: &CheckRegistry, mode: &str) -> GateResult<Self> {
        let mode = mode.trim();
        if mode.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        match registry.get(mode) {
            Some(check) => Ok(Self::Single(check.id().clone())),
            None => Err(GateError::UnknownCheck {
                name: mode.to_string(),
                valid: registry
                    .ids()
                    .iter()
                    .map(CheckId::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Single(id) => write!(f, "{id}"),
        }
    }
}

/// One row of `--list` output
#[derive(Debug, Clone, Serialize)]
pub struct CheckListing {
    pub id: CheckId,
    pub name: String,
    pub category: CheckCategory,
    pub tool: String,
    pub default_timeout_secs: u64,
    pub applicability: String,
    /// None when the check would run; otherwise why it would be skipped
    pub skip_reason: Option<String>,
}

/// Ordered set of registered checks
#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
    checks: Vec<RegisteredCheck>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a check; ids must be unique
    pub fn register(
        &mut self,
        definition: CheckDefinition,
        adapter: Arc<dyn ToolAdapter>,
        policy: SeverityPolicy,
    ) -> GateResult<()> {
        if self.get(definition.id.as_str()).is_some() {
            return Err(GateError::DuplicateCheck {
                id: definition.id.to_string(),
            });
        }
        self.checks.push(RegisteredCheck {
            definition,
            adapter,
            policy,
        });
        Ok(())
    }

    /// The five deep-tier checks in canonical order
    pub fn deep_tier(config: &GateConfig, policies: &PolicyTable) -> GateResult<Self> {
        let tools = &config.tools;
        let integration_dir = rel_path(&tools.integration_dir, &config.workspace);
        let bench_dir = rel_path(&tools.bench_dir, &config.workspace);

        let standard: Vec<(CheckDefinition, Arc<dyn ToolAdapter>)> = vec![
            (
                CheckDefinition {
                    id: SEMANTIC_SCAN,
                    name: "Semantic security scan".to_string(),
                    category: CheckCategory::SemanticSecurity,
                    applicability: Applicability::sources_of(SEMANTIC_EXTS),
                    default_timeout: Duration::from_secs(600),
                },
                Arc::new(SemgrepAdapter::new()),
            ),
            (
                CheckDefinition {
                    id: BUG_FINDER,
                    name: "Interprocedural bug finder".to_string(),
                    category: CheckCategory::InterproceduralBugs,
                    applicability: Applicability::AnyOf(vec![
                        Applicability::any_path(BUILD_FILES),
                        Applicability::sources_of(BUG_FINDER_EXTS),
                    ]),
                    default_timeout: Duration::from_secs(900),
                },
                Arc::new(InferAdapter::new()),
            ),
            (
                CheckDefinition {
                    id: INTEGRATION_TESTS,
                    name: "Integration tests".to_string(),
                    category: CheckCategory::IntegrationTests,
                    applicability: Applicability::AllOf(vec![
                        Applicability::sources_of(PYTHON_EXTS),
                        Applicability::any_path(&[integration_dir]),
                    ]),
                    default_timeout: Duration::from_secs(600),
                },
                Arc::new(PytestAdapter::new()),
            ),
            (
                CheckDefinition {
                    id: BENCHMARKS,
                    name: "Benchmarks vs. baseline".to_string(),
                    category: CheckCategory::Benchmarks,
                    applicability: Applicability::AllOf(vec![
                        Applicability::sources_of(PYTHON_EXTS),
                        Applicability::any_path(&[bench_dir]),
                    ]),
                    default_timeout: Duration::from_secs(600),
                },
                Arc::new(BenchmarkAdapter::new(policies.benchmark)),
            ),
            (
                CheckDefinition {
                    id: COMPLEXITY,
                    name: "Complexity / maintainability".to_string(),
                    category: CheckCategory::Complexity,
                    applicability: Applicability::sources_of(PYTHON_EXTS),
                    default_timeout: Duration::from_secs(120),
                },
                Arc::new(RadonAdapter::new()),
            ),
        ];

        let mut registry = Self::new();
        for (definition, adapter) in standard {
            let policy = policies.policy_for(&definition.id);
            registry.register(definition, adapter, policy)?;
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredCheck> {
        self.checks.iter().find(|c| c.id().as_str() == id)
    }

    /// Ids in registry order
    pub fn ids(&self) -> Vec<CheckId> {
        self.checks.iter().map(|c| c.id().clone()).collect()
    }

    /// Checks to run for `mode`, in registry order
    pub fn resolve(&self, mode: &RunMode) -> Vec<&RegisteredCheck> {
        match mode {
            RunMode::All => self.checks.iter().collect(),
            RunMode::Single(id) => self.checks.iter().filter(|c| c.id() == id).collect(),
        }
    }

    /// Every registered check with the verdict it would get on `profile`
    pub fn describe(&self, profile: &WorkspaceProfile) -> Vec<CheckListing> {
        self.checks
            .iter()
            .map(|check| {
                let def = &check.definition;
                let skip_reason = def.applicability.evaluate(profile).err().or_else(|| {
                    (!check.adapter.is_installed())
                        .then(|| format!("{} is not installed", check.adapter.tool()))
                });
                CheckListing {
                    id: def.id.clone(),
                    name: def.name.clone(),
                    category: def.category,
                    tool: check.adapter.tool().to_string(),
                    default_timeout_secs: def.default_timeout.as_secs(),
                    applicability: def.applicability.to_string(),
                    skip_reason,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// Workspace-relative path with forward slashes, as the workspace profile
/// stores them. Absolute paths outside the workspace are kept as given.
fn rel_path(path: &Path, workspace: &Path) -> String {
    let canonical = std::fs::canonicalize(workspace).ok();
    let relative = if path.is_absolute() {
        match path
            .strip_prefix(workspace)
            .ok()
            .or_else(|| canonical.as_deref().and_then(|ws| path.strip_prefix(ws).ok()))
        {
            Some(rel) => rel,
            None => return path.display().to_string(),
        }
    } else {
        path
    };

    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            Component::ParentDir => Some("..".into()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InvocationContext, ParsedOutput, RawOutput};
    use async_trait::async_trait;
    use std::fs;

    struct NoopAdapter;

    #[async_trait]
    impl ToolAdapter for NoopAdapter {
        fn tool(&self) -> &str {
            "noop"
        }
        fn is_installed(&self) -> bool {
            true
        }
        async fn invoke(&self, _ctx: &InvocationContext) -> GateResult<RawOutput> {
            Ok(RawOutput::default())
        }
        fn parse(&self, _raw: &RawOutput, _ctx: &InvocationContext) -> GateResult<ParsedOutput> {
            Ok(ParsedOutput::default())
        }
    }

    fn definition(id: &'static str) -> CheckDefinition {
        CheckDefinition {
            id: CheckId::from_static(id),
            name: id.to_string(),
            category: CheckCategory::Complexity,
            applicability: Applicability::Always,
            default_timeout: Duration::from_secs(5),
        }
    }

    fn standard() -> CheckRegistry {
        CheckRegistry::deep_tier(&GateConfig::default(), &PolicyTable::standard()).unwrap()
    }

    #[test]
    fn test_deep_tier_order() {
        let registry = standard();
        assert_eq!(
            registry.ids(),
            vec![SEMANTIC_SCAN, BUG_FINDER, INTEGRATION_TESTS, BENCHMARKS, COMPLEXITY]
        );
        assert_eq!(
            registry.get("bug_finder").unwrap().definition.default_timeout,
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_run_mode_parse() {
        let registry = standard();
        assert_eq!(RunMode::parse(&registry, "all").unwrap(), RunMode::All);
        assert_eq!(
            RunMode::parse(&registry, "complexity").unwrap(),
            RunMode::Single(COMPLEXITY)
        );

        let err = RunMode::parse(&registry, "lint").unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_CHECK");
        assert!(err.to_string().contains("semantic_scan"));
    }

    #[test]
    fn test_resolve_preserves_order() {
        let registry = standard();
        let all: Vec<_> = registry
            .resolve(&RunMode::All)
            .iter()
            .map(|c| c.id().clone())
            .collect();
        assert_eq!(all, registry.ids());

        let single = registry.resolve(&RunMode::Single(BENCHMARKS));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].id(), &BENCHMARKS);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = CheckRegistry::new();
        registry
            .register(definition("a"), Arc::new(NoopAdapter), SeverityPolicy::default())
            .unwrap();
        let err = registry
            .register(definition("a"), Arc::new(NoopAdapter), SeverityPolicy::default())
            .unwrap_err();
        assert!(matches!(err, GateError::DuplicateCheck { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_applicability_against_profile() {
        let ws = tempfile::tempdir().unwrap();
        fs::create_dir_all(ws.path().join("tests/integration")).unwrap();
        fs::write(ws.path().join("app.py"), "print(1)\n").unwrap();
        let profile = WorkspaceProfile::scan(ws.path(), &[]).unwrap();

        let registry = standard();
        let verdict = |id: &str| {
            registry
                .get(id)
                .unwrap()
                .definition
                .applicability
                .evaluate(&profile)
        };
        assert!(verdict("semantic_scan").is_ok());
        assert!(verdict("integration_tests").is_ok());
        assert!(verdict("complexity").is_ok());
        assert!(verdict("bug_finder").is_err());
        let reason = verdict("benchmarks").unwrap_err();
        assert!(reason.contains("benchmarks"), "{reason}");
    }

    #[test]
    fn test_rel_path_normalizes_configured_dirs() {
        let ws = tempfile::tempdir().unwrap();
        let root = ws.path();
        assert_eq!(rel_path(Path::new("./tests/integration"), root), "tests/integration");
        assert_eq!(rel_path(Path::new("tests/./integration/"), root), "tests/integration");
        assert_eq!(rel_path(&root.join("benchmarks"), root), "benchmarks");
        let canonical = fs::canonicalize(root).unwrap();
        assert_eq!(rel_path(&canonical.join("bench/perf"), root), "bench/perf");
        assert_eq!(rel_path(Path::new("/elsewhere/bench"), root), "/elsewhere/bench");
    }

    #[test]
    fn test_dot_and_absolute_dirs_still_apply() {
        let ws = tempfile::tempdir().unwrap();
        fs::create_dir_all(ws.path().join("tests/integration")).unwrap();
        fs::create_dir_all(ws.path().join("benchmarks")).unwrap();
        fs::write(ws.path().join("app.py"), "print(1)\n").unwrap();
        let profile = WorkspaceProfile::scan(ws.path(), &[]).unwrap();

        let mut config = GateConfig::default();
        config.workspace = ws.path().to_path_buf();
        config.tools.integration_dir = "./tests/integration".into();
        config.tools.bench_dir = ws.path().join("benchmarks");
        let registry = CheckRegistry::deep_tier(&config, &PolicyTable::standard()).unwrap();

        for id in ["integration_tests", "benchmarks"] {
            let verdict = registry.get(id).unwrap().definition.applicability.evaluate(&profile);
            assert!(verdict.is_ok(), "{id}: {verdict:?}");
        }
    }

    #[test]
    fn test_empty_workspace_nothing_applies() {
        let ws = tempfile::tempdir().unwrap();
        let profile = WorkspaceProfile::scan(ws.path(), &[]).unwrap();
        let listing = standard().describe(&profile);
        assert_eq!(listing.len(), 5);
        assert!(listing.iter().all(|l| l.skip_reason.is_some()));
    }

    #[test]
    fn test_applicability_display() {
        let a = Applicability::AllOf(vec![
            Applicability::sources_of(&["py"]),
            Applicability::any_path(&["benchmarks"]),
        ]);
        assert_eq!(a.to_string(), "(sources(.py) and path(benchmarks))");
    }
}
