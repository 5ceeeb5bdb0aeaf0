//! End-to-end driver tests against a scripted stand-in for gcc.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use stash_cache::CacheFacade;
use stash_core::Config;
use stash_wrap::{select_wrapper, Driver, Invocation, Outcome};

/// Installs a shell script that mimics the slice of gcc the wrapper uses:
/// `--version`, `-E -P` preprocessing to stdout, and `-c` compilation with
/// `-o`/`-MF` outputs. Every real compilation appends to `<script>.runs`.
fn write_fake_gcc(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("gcc");
    let script = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "fake-gcc 1.0"
  exit 0
fi
out=""
depfile=""
src=""
prev=""
emit_pp=0
for arg in "$@"; do
  case "$prev" in
    -o) out="$arg"; prev=""; continue;;
    -MF) depfile="$arg"; prev=""; continue;;
  esac
  case "$arg" in
    -E) emit_pp=1;;
    -o) prev="-o";;
    -MF) prev="-MF";;
    -*) ;;
    *.c) src="$arg";;
  esac
done
if [ "$emit_pp" = "1" ]; then
  cat "$src"
  exit 0
fi
echo "run" >> "$0.runs"
{ echo "compiled:"; cat "$src"; } > "$out"
if [ -n "$depfile" ]; then
  printf '%s: %s\n' "$out" "$src" > "$depfile"
fi
echo "fake-gcc: compiled $src" >&2
exit 0
"#;
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

struct Fixture {
    config: Config,
    compiler: PathBuf,
    _cache_dir: tempfile::TempDir,
    build_dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let cache_dir = tempfile::tempdir().unwrap();
        let build_dir = tempfile::tempdir().unwrap();
        let compiler = write_fake_gcc(build_dir.path());
        let mut config = Config::with_cache_dir(cache_dir.path());
        config.compress = false;
        Self {
            config,
            compiler,
            _cache_dir: cache_dir,
            build_dir,
        }
    }

    fn drive(&self, args: Vec<String>) -> Outcome {
        let invocation = Invocation::new(self.compiler.clone(), args);
        let mut wrapper = select_wrapper(&invocation).expect("gcc wrapper should be selected");
        let facade = CacheFacade::from_config(&self.config);
        let driver = Driver::new(&self.config, &facade);
        driver.handle_command(wrapper.as_mut(), &invocation)
    }

    fn compile_args(&self, source: &Path, object: &Path) -> Vec<String> {
        vec![
            "gcc".to_string(),
            "-c".to_string(),
            source.display().to_string(),
            "-o".to_string(),
            object.display().to_string(),
        ]
    }

    fn runs(&self) -> usize {
        std::fs::read_to_string(format!("{}.runs", self.compiler.display()))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

#[test]
fn cold_miss_compiles_then_warm_hit_replays() {
    let fixture = Fixture::new();
    let source = fixture.build_dir.path().join("foo.c");
    let object = fixture.build_dir.path().join("foo.o");
    std::fs::write(&source, "int main(void) { return 0; }\n").unwrap();

    assert_eq!(
        fixture.drive(fixture.compile_args(&source, &object)),
        Outcome::Handled(0)
    );
    assert_eq!(fixture.runs(), 1);
    let compiled = std::fs::read(&object).unwrap();
    assert!(compiled.starts_with(b"compiled:"));

    std::fs::remove_file(&object).unwrap();
    assert_eq!(
        fixture.drive(fixture.compile_args(&source, &object)),
        Outcome::Handled(0)
    );
    assert_eq!(fixture.runs(), 1, "the hit must not re-run the compiler");
    assert_eq!(std::fs::read(&object).unwrap(), compiled);
}

#[test]
fn source_changes_invalidate_the_entry() {
    let fixture = Fixture::new();
    let source = fixture.build_dir.path().join("foo.c");
    let object = fixture.build_dir.path().join("foo.o");

    std::fs::write(&source, "int x = 1;\n").unwrap();
    fixture.drive(fixture.compile_args(&source, &object));

    std::fs::write(&source, "int x = 2;\n").unwrap();
    assert_eq!(
        fixture.drive(fixture.compile_args(&source, &object)),
        Outcome::Handled(0)
    );
    assert_eq!(fixture.runs(), 2);
    let compiled = String::from_utf8(std::fs::read(&object).unwrap()).unwrap();
    assert!(compiled.contains("int x = 2;"));
}

#[test]
fn depfiles_are_cached_alongside_the_object() {
    let fixture = Fixture::new();
    let source = fixture.build_dir.path().join("foo.c");
    let object = fixture.build_dir.path().join("foo.o");
    let depfile = fixture.build_dir.path().join("foo.d");
    std::fs::write(&source, "int y;\n").unwrap();

    let mut args = fixture.compile_args(&source, &object);
    args.push("-MF".to_string());
    args.push(depfile.display().to_string());

    assert_eq!(fixture.drive(args.clone()), Outcome::Handled(0));
    let dep_content = std::fs::read(&depfile).unwrap();

    std::fs::remove_file(&object).unwrap();
    std::fs::remove_file(&depfile).unwrap();
    assert_eq!(fixture.drive(args), Outcome::Handled(0));
    assert_eq!(fixture.runs(), 1);
    assert_eq!(std::fs::read(&depfile).unwrap(), dep_content);
}

#[test]
fn direct_mode_serves_the_second_compile_without_preprocessing() {
    let mut fixture = Fixture::new();
    fixture.config.direct_mode = true;

    let source = fixture.build_dir.path().join("foo.c");
    let object = fixture.build_dir.path().join("foo.o");
    std::fs::write(&source, "int z;\n").unwrap();

    fixture.drive(fixture.compile_args(&source, &object));
    assert!(
        fixture._cache_dir.path().join("dm").exists(),
        "first compile should record the direct fingerprint"
    );

    std::fs::remove_file(&object).unwrap();
    assert_eq!(
        fixture.drive(fixture.compile_args(&source, &object)),
        Outcome::Handled(0)
    );
    assert_eq!(fixture.runs(), 1);
    assert!(object.exists());
}

#[test]
fn link_commands_fall_through_to_the_real_compiler() {
    let fixture = Fixture::new();
    let object = fixture.build_dir.path().join("foo.o");
    std::fs::write(&object, b"object").unwrap();

    // No -c: the wrapper refuses and the caller is told to run the program.
    let args = vec![
        "gcc".to_string(),
        object.display().to_string(),
        "-o".to_string(),
        fixture.build_dir.path().join("app").display().to_string(),
    ];
    assert_eq!(fixture.drive(args), Outcome::NotHandled);
    assert_eq!(fixture.runs(), 0, "the driver itself must not run it");
}
