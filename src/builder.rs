use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::annotate::BranchAnnotation;
use crate::generator::{CodegenParams, GeneratedSources, generate_c_code};
use crate::ir::Model;

/// Operating systems with distinct shared-library naming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetOs {
    Windows,
    MacOs,
    Unix,
}

impl TargetOs {
    /// The OS this crate was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else if cfg!(target_os = "macos") {
            TargetOs::MacOs
        } else {
            TargetOs::Unix
        }
    }

    pub fn shared_library_extension(self) -> &'static str {
        match self {
            TargetOs::Windows => "dll",
            TargetOs::MacOs => "dylib",
            TargetOs::Unix => "so",
        }
    }
}

/// `compiled-model.so` on Linux, `.dylib` on macOS, `.dll` on Windows.
pub fn shared_library_name(stem: &str) -> String {
    format!("{stem}.{}", TargetOs::current().shared_library_extension())
}

/// C compiler used to build the predictor. Both accepted families share the
/// same command-line conventions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Toolchain {
    Gcc(String),
    Clang(String),
}

impl FromStr for Toolchain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = Path::new(s)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(s);
        if name.starts_with("clang") {
            Ok(Toolchain::Clang(s.to_string()))
        } else if name.starts_with("gcc") || name == "cc" {
            Ok(Toolchain::Gcc(s.to_string()))
        } else {
            Err(anyhow!(
                "unsupported toolchain {s:?}: expected gcc or clang (optionally with a path or version suffix)"
            ))
        }
    }
}

impl fmt::Display for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl Toolchain {
    pub fn command(&self) -> &str {
        match self {
            Toolchain::Gcc(cmd) | Toolchain::Clang(cmd) => cmd,
        }
    }

    /// True if `<compiler> --version` runs successfully.
    pub fn is_available(&self) -> bool {
        Command::new(self.command())
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn compile_args(&self, source: &Path, object: &Path) -> Vec<String> {
        let mut args = vec!["-c".to_string(), "-O3".to_string(), "-std=c99".to_string()];
        if TargetOs::current() != TargetOs::Windows {
            args.push("-fPIC".to_string());
        }
        args.push("-o".to_string());
        args.push(object.display().to_string());
        args.push(source.display().to_string());
        args
    }

    fn link_args(&self, objects: &[PathBuf], libpath: &Path) -> Vec<String> {
        let mut args = vec!["-shared".to_string(), "-O3".to_string()];
        args.push("-o".to_string());
        args.push(libpath.display().to_string());
        args.extend(objects.iter().map(|o| o.display().to_string()));
        args.push("-lm".to_string());
        args
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExportParams {
    /// Translation units, and the number of compiler processes run at once.
    pub parallel_comp: usize,
    pub annotation: Option<BranchAnnotation>,
    /// Keep generated sources here instead of a temporary directory.
    pub keep_sources: Option<PathBuf>,
}

fn run_compiler(toolchain: &Toolchain, args: &[String], what: &str) -> Result<()> {
    let output = Command::new(toolchain.command())
        .args(args)
        .output()
        .with_context(|| {
            format!(
                "failed to spawn {}; ensure a C compiler is installed and on PATH",
                toolchain.command()
            )
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let combined = format!("{}\n{}", stdout.trim(), stderr.trim());
        warn!(toolchain = %toolchain, what, "compiler invocation failed:\n{}", combined);
        return Err(anyhow!(
            "{} failed while building {} with status {}.\n\nCompiler output:\n{}",
            toolchain.command(),
            what,
            output.status,
            combined
        ));
    }
    Ok(())
}

/// Compile each source into an object next to it, running up to `jobs`
/// compiler processes concurrently. Returns objects in source order.
pub fn compile_objects(toolchain: &Toolchain, sources: &[PathBuf], jobs: usize) -> Result<Vec<PathBuf>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.clamp(1, sources.len().max(1)))
        .build()
        .context("failed to build compile thread pool")?;

    pool.install(|| {
        sources
            .par_iter()
            .map(|source| {
                let object = source.with_extension("o");
                debug!(source = %source.display(), "compiling");
                run_compiler(
                    toolchain,
                    &toolchain.compile_args(source, &object),
                    &source.display().to_string(),
                )?;
                Ok(object)
            })
            .collect()
    })
}

pub fn link_shared_library(toolchain: &Toolchain, objects: &[PathBuf], libpath: &Path) -> Result<()> {
    if let Some(parent) = libpath.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    run_compiler(
        toolchain,
        &toolchain.link_args(objects, libpath),
        &libpath.display().to_string(),
    )
}

/// Compile already generated sources into a shared library.
pub fn build_library(
    toolchain: &Toolchain,
    generated: &GeneratedSources,
    libpath: &Path,
    jobs: usize,
) -> Result<()> {
    if generated.sources.is_empty() {
        bail!("no sources to compile in {}", generated.dir.display());
    }
    let objects = compile_objects(toolchain, &generated.sources, jobs)?;
    info!(objects = objects.len(), toolchain = %toolchain, "compiled objects");
    link_shared_library(toolchain, &objects, libpath)?;
    info!(path = %libpath.display(), "linked shared library");
    Ok(())
}

/// Generate C for `model` and build it into a shared library at `libpath`.
pub fn export_lib(
    model: &Model,
    toolchain: &Toolchain,
    libpath: &Path,
    params: &ExportParams,
) -> Result<PathBuf> {
    if !toolchain.is_available() {
        return Err(anyhow!(
            "{} not found: install a C compiler (gcc or clang) and ensure it is on PATH",
            toolchain.command()
        ));
    }

    let tmpdir = tempfile::tempdir().context("failed to create temp dir for generated sources")?;
    let source_dir = params
        .keep_sources
        .clone()
        .unwrap_or_else(|| tmpdir.path().to_path_buf());

    let codegen = CodegenParams {
        parallel_comp: params.parallel_comp,
        annotation: params.annotation.clone(),
    };
    let generated = generate_c_code(model, &codegen, &source_dir)?;
    build_library(toolchain, &generated, libpath, params.parallel_comp.max(1))?;

    if params.keep_sources.is_some() {
        info!(path = %source_dir.display(), "kept generated sources");
    }
    Ok(libpath.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lookup() {
        assert_eq!(TargetOs::Windows.shared_library_extension(), "dll");
        assert_eq!(TargetOs::MacOs.shared_library_extension(), "dylib");
        assert_eq!(TargetOs::Unix.shared_library_extension(), "so");
    }

    #[test]
    fn test_shared_library_name_uses_current_os() {
        let name = shared_library_name("compiled-model");
        let ext = TargetOs::current().shared_library_extension();
        assert_eq!(name, format!("compiled-model.{ext}"));
    }

    #[test]
    fn test_toolchain_parse() {
        assert_eq!("gcc".parse::<Toolchain>().unwrap(), Toolchain::Gcc("gcc".into()));
        assert_eq!(
            "/usr/bin/clang-17".parse::<Toolchain>().unwrap(),
            Toolchain::Clang("/usr/bin/clang-17".into())
        );
        assert_eq!("cc".parse::<Toolchain>().unwrap(), Toolchain::Gcc("cc".into()));
        assert!("msvc".parse::<Toolchain>().is_err());
    }

    #[test]
    fn test_compile_args_shape() {
        let tc = Toolchain::Gcc("gcc".into());
        let args = tc.compile_args(Path::new("main.c"), Path::new("main.o"));
        assert_eq!(&args[..3], &["-c", "-O3", "-std=c99"]);
        assert_eq!(args.last().map(String::as_str), Some("main.c"));

        let link = tc.link_args(&[PathBuf::from("a.o"), PathBuf::from("b.o")], Path::new("x.so"));
        assert_eq!(link[0], "-shared");
        assert!(link.contains(&"a.o".to_string()) && link.contains(&"b.o".to_string()));
    }

    #[test]
    fn test_missing_compiler_is_reported() {
        let tc = Toolchain::Gcc("gcc-definitely-not-installed-0".into());
        assert!(!tc.is_available());
        let err = run_compiler(&tc, &["--version".to_string()], "probe").unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
