//! Jar round trips through the command line front end.
use crate::fixtures::*;
use jarcloak_cli::archive;
use jarcloak_cli::commands::inspect;
use jarcloak_cli::commands::obfuscate::ObfuscateArgs;
use jarcloak_cli::commands::Command;
use jarcloak_core::{access, Insn, Opcode, OBJECT};
use jarcloak_transform::config::RenameOption;
use jarcloak_transform::entries::OutputArchive;
use jarcloak_transform::obfuscator::ObfuscationReport;
use jarcloak_utils::errors::InputError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_input(dir: &Path) -> PathBuf {
    let mut tool = class("t/Tool", OBJECT);
    tool.methods.push(method(
        access::PUBLIC | access::STATIC,
        "main",
        "([Ljava/lang/String;)V",
        [
            Insn::type_insn(Opcode::NEW, "t/Helper"),
            Insn::op(Opcode::DUP),
            Insn::method(Opcode::INVOKESPECIAL, "t/Helper", "<init>", "()V"),
            Insn::method(Opcode::INVOKEVIRTUAL, "t/Helper", "help", "()V"),
            Insn::op(Opcode::RETURN),
        ],
    ));
    let mut helper = class("t/Helper", OBJECT);
    helper.methods.push(empty("help"));

    let mut input = OutputArchive::new();
    input.push("META-INF/MANIFEST.MF", b"Main-Class: t.Tool\n".to_vec());
    for entry in entries(&[tool, helper]) {
        input.push(entry.name, entry.bytes);
    }
    let path = dir.join("in.jar");
    archive::write_archive(&path, &input).unwrap();
    path
}

fn args(input: PathBuf, output: PathBuf) -> ObfuscateArgs {
    ObfuscateArgs {
        input,
        output,
        config: None,
        seed: Some(42),
        rename: Some(RenameOption::Alphabet),
        control_flow: None,
        constants: None,
        exclude_file: None,
        libraries: Vec::new(),
        jdk: None,
        no_jdk: true,
        sequential: true,
        emit: None,
    }
}

#[tokio::test]
async fn obfuscate_writes_a_jar_and_a_report() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path());
    let output = dir.path().join("out.jar");
    let report = dir.path().join("report.json");
    let mut args = args(input, output.clone());
    args.emit = Some(report.clone());
    args.execute().await.expect("obfuscation succeeds");

    let entries = archive::read_archive(&output).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["META-INF/MANIFEST.MF", "AA.class", "AB.class"]);
    assert_eq!(entries[0].bytes, b"Main-Class: AA\n");

    let report: ObfuscationReport =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(report.seed, 42);
    assert_eq!((report.classes_in, report.classes_out), (2, 2));
    assert!(report.transformers.contains(&"MethodRenamer".to_string()));

    let classes = inspect::read_classes(&output).unwrap();
    let helper = classes.iter().find(|c| c.name == "AB").unwrap();
    assert_ne!(helper.methods[1].name, "help");
}

#[tokio::test]
async fn unsupported_inputs_fail_before_any_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    std::fs::write(&input, "not a jar").unwrap();
    let output = dir.path().join("out.jar");
    let error = args(input, output.clone()).execute().await.unwrap_err();
    assert!(error.to_string().contains("unsupported input format"), "{error}");
    assert!(!output.exists());
}

#[test]
fn library_jars_feed_the_class_path() {
    let dir = TempDir::new().unwrap();
    let mut lib = OutputArchive::new();
    let widget = class("lib/Widget", "lib/Base");
    lib.push("lib/Widget.class", encode(&widget));
    lib.push("lib/broken.class", vec![0, 1, 2]);
    let path = dir.path().join("lib.jar");
    archive::write_archive(&path, &lib).unwrap();

    let class_path = archive::load_library(&[&path], None).unwrap();
    let header = class_path.get("lib/Widget").expect("library class loaded");
    assert_eq!(header.super_name.as_deref(), Some("lib/Base"));
    assert!(class_path.contains(OBJECT), "JDK types stay available");

    let missing = dir.path().join("missing.jar");
    assert!(matches!(
        archive::load_library(&[&missing], None),
        Err(InputError::NotFound(_))
    ));
}

#[tokio::test]
async fn a_named_jdk_without_a_runtime_image_fails_before_any_output() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path());
    let output = dir.path().join("out.jar");
    let mut args = args(input, output.clone());
    args.no_jdk = false;
    args.jdk = Some(dir.path().to_path_buf());
    let error = args.execute().await.unwrap_err();
    assert!(error.to_string().contains("unreadable runtime image"), "{error}");
    assert!(!output.exists());
}
