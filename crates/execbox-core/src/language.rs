//! Language runtime registry.
//!
//! A static table mapping language identifiers to their source layout,
//! optional compile step and run command. Commands are built as argument
//! vectors and spawned directly, never through a shell.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

/// How a language honours the configured memory ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// `RLIMIT_AS` is applied to the process before exec.
    AddressSpace,
    /// The runtime reserves large virtual ranges up front, so the ceiling is
    /// passed as a heap flag on the run command instead.
    RuntimeFlag,
}

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Absolute paths of one build inside a workspace.
#[derive(Debug, Clone)]
pub struct BuildPaths {
    /// Workspace directory (also the working directory of every command).
    pub dir: PathBuf,
    /// Materialized source file.
    pub source: PathBuf,
    /// Compiled artifact (native binary). Unused by interpreted languages.
    pub artifact: PathBuf,
}

impl BuildPaths {
    /// Paths for `spec` inside `dir`.
    pub fn new(spec: &LanguageSpec, dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            source: dir.join(spec.source_file_name()),
            artifact: dir.join(spec.source_stem),
        }
    }
}

/// Builds the compile command for a source.
pub type CompileTemplate = fn(&BuildPaths) -> CommandLine;

/// Builds the run command; the second argument is the memory ceiling in MiB.
pub type RunTemplate = fn(&BuildPaths, Option<u64>) -> CommandLine;

/// Static description of a supported language.
pub struct LanguageSpec {
    /// Registry key.
    pub id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Alternative identifiers accepted by [`resolve`].
    pub aliases: &'static [&'static str],
    /// Source file name without extension.
    pub source_stem: &'static str,
    /// Source file extension (without the dot).
    pub extension: &'static str,
    /// Compile step, if the language has one.
    pub compile: Option<CompileTemplate>,
    /// Run command.
    pub run: RunTemplate,
    /// Source substrings that indicate the program reads standard input.
    pub input_markers: &'static [&'static str],
    /// How the memory ceiling is enforced.
    pub memory_policy: MemoryPolicy,
    /// Binaries that must be on PATH for this language to work.
    pub toolchain: &'static [&'static str],
}

impl LanguageSpec {
    /// Source file name, e.g. `main.py`.
    pub fn source_file_name(&self) -> String {
        format!("{}.{}", self.source_stem, self.extension)
    }

    /// Whether a compile step precedes the run.
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Whether every toolchain binary can be found on PATH.
    pub fn is_available(&self) -> bool {
        self.toolchain.iter().all(|bin| which::which(bin).is_ok())
    }

    /// Summary used by the language listing.
    pub fn info(&self) -> LanguageInfo {
        LanguageInfo {
            id: self.id,
            name: self.name,
            extension: self.extension,
            compiled: self.is_compiled(),
            available: self.is_available(),
        }
    }
}

impl fmt::Debug for LanguageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageSpec")
            .field("id", &self.id)
            .field("extension", &self.extension)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// Serializable summary of a language and its toolchain availability.
#[derive(Debug, Clone, Serialize)]
pub struct LanguageInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub extension: &'static str,
    pub compiled: bool,
    pub available: bool,
}

fn python_run(paths: &BuildPaths, _memory_mb: Option<u64>) -> CommandLine {
    CommandLine::new("python3").arg("-u").path_arg(&paths.source)
}

fn javascript_run(paths: &BuildPaths, memory_mb: Option<u64>) -> CommandLine {
    let cmd = CommandLine::new("node");
    let cmd = match memory_mb {
        Some(mb) => cmd.arg(format!("--max-old-space-size={}", mb)),
        None => cmd,
    };
    cmd.path_arg(&paths.source)
}

fn cpp_compile(paths: &BuildPaths) -> CommandLine {
    CommandLine::new("g++")
        .arg("-O2")
        .arg("-std=c++17")
        .arg("-o")
        .path_arg(&paths.artifact)
        .path_arg(&paths.source)
}

fn c_compile(paths: &BuildPaths) -> CommandLine {
    CommandLine::new("gcc")
        .arg("-O2")
        .arg("-std=c11")
        .arg("-o")
        .path_arg(&paths.artifact)
        .path_arg(&paths.source)
        .arg("-lm")
}

fn native_run(paths: &BuildPaths, _memory_mb: Option<u64>) -> CommandLine {
    CommandLine::new(paths.artifact.to_string_lossy().into_owned())
}

fn java_compile(paths: &BuildPaths) -> CommandLine {
    CommandLine::new("javac")
        .arg("-encoding")
        .arg("UTF-8")
        .path_arg(&paths.source)
}

fn java_run(paths: &BuildPaths, memory_mb: Option<u64>) -> CommandLine {
    let cmd = CommandLine::new("java");
    let cmd = match memory_mb {
        Some(mb) => cmd.arg(format!("-Xmx{}m", mb)),
        None => cmd,
    };
    cmd.arg("-Dfile.encoding=UTF-8")
        .arg("-cp")
        .path_arg(&paths.dir)
        .arg("Main")
}

/// All supported languages.
pub static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        id: "python",
        name: "Python",
        aliases: &["py", "python3"],
        source_stem: "main",
        extension: "py",
        compile: None,
        run: python_run,
        input_markers: &["input(", "sys.stdin"],
        memory_policy: MemoryPolicy::AddressSpace,
        toolchain: &["python3"],
    },
    LanguageSpec {
        id: "javascript",
        name: "JavaScript",
        aliases: &["js", "node"],
        source_stem: "main",
        extension: "js",
        compile: None,
        run: javascript_run,
        input_markers: &["readline", "process.stdin"],
        memory_policy: MemoryPolicy::RuntimeFlag,
        toolchain: &["node"],
    },
    LanguageSpec {
        id: "cpp",
        name: "C++",
        aliases: &["c++", "cxx"],
        source_stem: "main",
        extension: "cpp",
        compile: Some(cpp_compile),
        run: native_run,
        input_markers: &["cin >>", "cin>>", "getline", "scanf"],
        memory_policy: MemoryPolicy::AddressSpace,
        toolchain: &["g++"],
    },
    LanguageSpec {
        id: "c",
        name: "C",
        aliases: &[],
        source_stem: "main",
        extension: "c",
        compile: Some(c_compile),
        run: native_run,
        input_markers: &["scanf", "getchar", "fgets", "getline"],
        memory_policy: MemoryPolicy::AddressSpace,
        toolchain: &["gcc"],
    },
    LanguageSpec {
        id: "java",
        name: "Java",
        aliases: &[],
        // javac requires the public class to match the file name
        source_stem: "Main",
        extension: "java",
        compile: Some(java_compile),
        run: java_run,
        input_markers: &["Scanner", "readLine", "System.in"],
        memory_policy: MemoryPolicy::RuntimeFlag,
        toolchain: &["javac", "java"],
    },
];

/// Resolve a language identifier or alias (case-insensitive).
pub fn resolve(id: &str) -> Result<&'static LanguageSpec> {
    let key = id.trim().to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|spec| spec.id == key || spec.aliases.contains(&key.as_str()))
        .ok_or_else(|| Error::UnsupportedLanguage(id.to_string()))
}

/// Find the language whose source extension matches `ext`.
pub fn from_extension(ext: &str) -> Option<&'static LanguageSpec> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    LANGUAGES.iter().find(|spec| spec.extension == ext)
}

/// Identifiers of every supported language.
pub fn supported_ids() -> Vec<&'static str> {
    LANGUAGES.iter().map(|spec| spec.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_languages() {
        for id in ["python", "javascript", "cpp", "c", "java"] {
            assert_eq!(resolve(id).unwrap().id, id);
        }
    }

    #[test]
    fn test_resolve_aliases_and_case() {
        assert_eq!(resolve("  Python ").unwrap().id, "python");
        assert_eq!(resolve("JS").unwrap().id, "javascript");
        assert_eq!(resolve("c++").unwrap().id, "cpp");
    }

    #[test]
    fn test_resolve_unsupported() {
        match resolve("cobol") {
            Err(Error::UnsupportedLanguage(id)) => assert_eq!(id, "cobol"),
            other => panic!("expected UnsupportedLanguage, got {:?}", other),
        }
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(from_extension("py").unwrap().id, "python");
        assert_eq!(from_extension(".java").unwrap().id, "java");
        assert!(from_extension("rb").is_none());
    }

    #[test]
    fn test_compiled_languages() {
        assert!(!resolve("python").unwrap().is_compiled());
        assert!(!resolve("javascript").unwrap().is_compiled());
        assert!(resolve("cpp").unwrap().is_compiled());
        assert!(resolve("java").unwrap().is_compiled());
    }

    #[test]
    fn test_cpp_commands_use_absolute_paths() {
        let spec = resolve("cpp").unwrap();
        let paths = BuildPaths::new(spec, Path::new("/tmp/execbox/abc"));
        let compile = (spec.compile.unwrap())(&paths);
        assert_eq!(compile.program, "g++");
        assert!(compile.args.contains(&"/tmp/execbox/abc/main.cpp".to_string()));
        assert!(compile.args.contains(&"/tmp/execbox/abc/main".to_string()));

        let run = (spec.run)(&paths, Some(256));
        assert_eq!(run.program, "/tmp/execbox/abc/main");
        assert!(run.args.is_empty());
    }

    #[test]
    fn test_runtime_flag_languages_receive_heap_limit() {
        let java = resolve("java").unwrap();
        let paths = BuildPaths::new(java, Path::new("/w"));
        assert_eq!(paths.source, Path::new("/w/Main.java"));
        let run = (java.run)(&paths, Some(256));
        assert!(run.args.contains(&"-Xmx256m".to_string()));
        assert_eq!(run.args.last().map(String::as_str), Some("Main"));

        let node = resolve("javascript").unwrap();
        let run = (node.run)(&BuildPaths::new(node, Path::new("/w")), Some(128));
        assert_eq!(run.args[0], "--max-old-space-size=128");

        let unlimited = (node.run)(&BuildPaths::new(node, Path::new("/w")), None);
        assert_eq!(unlimited.args, vec!["/w/main.js".to_string()]);
    }

    #[test]
    fn test_command_line_display() {
        let spec = resolve("python").unwrap();
        let run = (spec.run)(&BuildPaths::new(spec, Path::new("/w")), None);
        assert_eq!(run.to_string(), "python3 -u /w/main.py");
    }

    #[test]
    fn test_supported_ids_order() {
        assert_eq!(supported_ids(), vec!["python", "javascript", "cpp", "c", "java"]);
    }
}
