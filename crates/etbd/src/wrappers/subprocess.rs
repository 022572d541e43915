//! Manifest-driven subprocess wrappers.
//!
//! The wrappers directory holds one TOML manifest per external tool:
//!
//! ```toml
//! predicate = "asciidoc"
//! signature = "+opts:value, +src:file, -out:file"
//! command = ["asciidoc", "$src"]
//!
//! [output]
//! source = "file"
//! arg = "out"
//! path = "$src.html"
//! ```
//!
//! Bound arguments substitute into `$name` placeholders; file-kind inputs
//! are materialised into the invocation workspace first and substitute as
//! paths. The output binding comes from stdout or from a produced file,
//! which is put into the blob store and bound as a file reference.

use super::{Outcome, Wrapper, WrapperContext};
use async_trait::async_trait;
use etb_core::error::EtbError;
use etb_core::{ArgKind, ArgMode, ArgSpec, Literal, Subst, Term};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct WrapperManifest {
    pub predicate: String,
    pub signature: String,
    pub command: Vec<String>,
    pub output: OutputSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OutputSpec {
    /// Bind the output argument to the tool's stdout as a string constant.
    Stdout { arg: String },
    /// Bind the output argument to a produced file, stored as a blob.
    File { arg: String, path: String },
}

impl OutputSpec {
    fn arg(&self) -> &str {
        match self {
            OutputSpec::Stdout { arg } | OutputSpec::File { arg, .. } => arg,
        }
    }
}

pub struct SubprocessWrapper {
    manifest: WrapperManifest,
    signature: Vec<ArgSpec>,
}

impl SubprocessWrapper {
    pub fn from_manifest(manifest: WrapperManifest) -> Result<Self, EtbError> {
        let signature = ArgSpec::parse_signature(&manifest.signature)?;
        if manifest.command.is_empty() {
            return Err(EtbError::Signature(format!(
                "wrapper {} has an empty command",
                manifest.predicate
            )));
        }
        let out_arg = manifest.output.arg();
        let declared = signature
            .iter()
            .any(|s| s.name == out_arg && s.mode == ArgMode::Free);
        if !declared {
            return Err(EtbError::Signature(format!(
                "wrapper {}: output argument {} is not a '-' argument",
                manifest.predicate, out_arg
            )));
        }
        Ok(SubprocessWrapper {
            manifest,
            signature,
        })
    }

    /// Load every `*.toml` manifest in a directory. Malformed manifests are
    /// skipped with a warning so one bad tool cannot keep the node down.
    pub fn load_dir(dir: &Path) -> Vec<Arc<dyn Wrapper>> {
        let mut out: Vec<Arc<dyn Wrapper>> = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read wrappers dir {}: {}", dir.display(), e);
                return out;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e != "toml").unwrap_or(true) {
                continue;
            }
            let loaded = fs::read_to_string(&path)
                .map_err(EtbError::Io)
                .and_then(|text| {
                    toml::from_str::<WrapperManifest>(&text)
                        .map_err(|e| EtbError::Config(e.to_string()))
                })
                .and_then(SubprocessWrapper::from_manifest);
            match loaded {
                Ok(wrapper) => {
                    info!("loaded tool wrapper {} from {}", wrapper.name(), path.display());
                    out.push(Arc::new(wrapper));
                }
                Err(e) => warn!("skipping wrapper manifest {}: {}", path.display(), e),
            }
        }
        out
    }

    /// Placeholder values for the bound arguments: plain text for values,
    /// workspace paths for files.
    fn placeholder_values(
        &self,
        ctx: &WrapperContext,
        literal: &Literal,
    ) -> Result<HashMap<String, String>, String> {
        let mut values = HashMap::new();
        for (spec, arg) in self.signature.iter().zip(&literal.args) {
            if spec.mode == ArgMode::Free {
                continue;
            }
            let text = match (spec.kind, arg) {
                (ArgKind::File, Term::File(r)) => {
                    let staged = ctx
                        .store
                        .materialize(r, &ctx.workspace)
                        .map_err(|e| format!("cannot stage {}: {}", r.file, e))?;
                    staged.display().to_string()
                }
                (_, Term::Str(s)) => s.clone(),
                (_, Term::Num(n)) => n.to_string(),
                (_, Term::Id(s)) => s.clone(),
                (_, Term::Bool(b)) => b.to_string(),
                (_, other) => other.to_string(),
            };
            values.insert(spec.name.clone(), text);
        }
        Ok(values)
    }
}

/// Replace `$name` placeholders; longer names first so `$src2` is never
/// clobbered by `$src`.
fn substitute(template: &str, values: &HashMap<String, String>) -> String {
    let mut names: Vec<&String> = values.keys().collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    let mut out = template.to_string();
    for name in names {
        out = out.replace(&format!("${}", name), &values[name]);
    }
    out
}

#[async_trait]
impl Wrapper for SubprocessWrapper {
    fn name(&self) -> &str {
        &self.manifest.predicate
    }

    fn signature(&self) -> &[ArgSpec] {
        &self.signature
    }

    async fn resolve(&self, ctx: &WrapperContext, literal: &Literal) -> Outcome {
        let values = match self.placeholder_values(ctx, literal) {
            Ok(values) => values,
            Err(message) => return Outcome::Errors(vec![message]),
        };
        let argv: Vec<String> = self
            .manifest
            .command
            .iter()
            .map(|part| substitute(part, &values))
            .collect();

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = tokio::time::timeout(ctx.timeout, async {
            command.output().await
        })
        .await;

        let output = match run {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Outcome::Errors(vec![format!("{}: failed to spawn: {}", argv[0], e)])
            }
            Err(_) => {
                return Outcome::Errors(vec![format!(
                    "{}: timed out after {:?}",
                    argv[0], ctx.timeout
                )])
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Outcome::Errors(vec![format!(
                "{} exited with {}: {}",
                argv[0],
                output.status,
                stderr.trim()
            )]);
        }

        let out_var = {
            let out_arg = self.manifest.output.arg();
            let position = self.signature.iter().position(|s| s.name == out_arg);
            match position.and_then(|i| literal.args.get(i)) {
                Some(Term::Var(v)) => v.clone(),
                _ => return Outcome::Errors(vec![format!(
                    "{}: output argument is not a variable in {}",
                    self.manifest.predicate, literal
                )]),
            }
        };

        let bound = match &self.manifest.output {
            OutputSpec::Stdout { .. } => {
                Term::Str(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            OutputSpec::File { path, .. } => {
                let produced = ctx.workspace.join(substitute(path, &values));
                let bytes = match fs::read(&produced) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return Outcome::Errors(vec![format!(
                            "{}: expected output file {}: {}",
                            self.manifest.predicate,
                            produced.display(),
                            e
                        )])
                    }
                };
                let name = produced
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "output".to_string());
                match ctx.store.put_bytes(&name, &bytes) {
                    Ok(fileref) => Term::File(fileref),
                    Err(e) => {
                        return Outcome::Errors(vec![format!(
                            "{}: cannot store output: {}",
                            self.manifest.predicate, e
                        )])
                    }
                }
            }
        };

        let mut subst = Subst::new();
        subst.bind(out_var, bound);
        Outcome::Substitutions(vec![subst])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestore::FileStore;
    use etb_core::parser::parse_literal;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manifest(toml_text: &str) -> WrapperManifest {
        toml::from_str(toml_text).unwrap()
    }

    fn echo_manifest() -> WrapperManifest {
        manifest(
            r#"
            predicate = "shout"
            signature = "+msg:value, -out:value"
            command = ["echo", "$msg"]

            [output]
            source = "stdout"
            arg = "out"
            "#,
        )
    }

    #[test]
    fn test_manifest_parses() {
        let wrapper = SubprocessWrapper::from_manifest(echo_manifest()).unwrap();
        assert_eq!(wrapper.name(), "shout");
        assert_eq!(wrapper.signature().len(), 2);
    }

    #[test]
    fn test_manifest_rejects_bad_output_arg() {
        let mut bad = echo_manifest();
        bad.output = OutputSpec::Stdout { arg: "msg".into() };
        assert!(SubprocessWrapper::from_manifest(bad).is_err());
    }

    #[test]
    fn test_substitute_longest_first() {
        let mut values = HashMap::new();
        values.insert("src".to_string(), "a.txt".to_string());
        values.insert("src2".to_string(), "b.txt".to_string());
        assert_eq!(substitute("$src $src2", &values), "a.txt b.txt");
    }

    #[tokio::test]
    async fn test_echo_binds_stdout() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path().join("wd")).unwrap());
        let workspace = store.workspace("t").unwrap();
        let ctx = WrapperContext {
            store,
            workspace,
            timeout: Duration::from_secs(10),
        };
        let wrapper = SubprocessWrapper::from_manifest(echo_manifest()).unwrap();
        let literal = parse_literal("shout(\"hello\", Out)").unwrap();
        match wrapper.resolve(&ctx, &literal).await {
            Outcome::Substitutions(substs) => {
                assert_eq!(substs.len(), 1);
                match substs[0].get("Out") {
                    Some(Term::Str(s)) => assert_eq!(s.trim(), "hello"),
                    other => panic!("expected string binding, got {:?}", other),
                }
            }
            other => panic!("expected substitutions, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_tool_is_an_error_outcome() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path().join("wd")).unwrap());
        let workspace = store.workspace("t").unwrap();
        let ctx = WrapperContext {
            store,
            workspace,
            timeout: Duration::from_secs(5),
        };
        let wrapper = SubprocessWrapper::from_manifest(manifest(
            r#"
            predicate = "nosuch"
            signature = "+x:value, -out:value"
            command = ["definitely-not-a-real-tool-7f3a", "$x"]

            [output]
            source = "stdout"
            arg = "out"
            "#,
        ))
        .unwrap();
        let literal = parse_literal("nosuch(1, Out)").unwrap();
        assert!(matches!(
            wrapper.resolve(&ctx, &literal).await,
            Outcome::Errors(_)
        ));
    }
}
