use crate::fixtures::*;
use jarcloak_core::insn::VerificationType;
use jarcloak_core::model::TryCatchBlock;
use jarcloak_core::{access, ClassModel, Insn, Label, MethodModel, Opcode, MAX_CODE_SIZE, OBJECT};
use jarcloak_transform::config::{
    ConstantOption, ControlFlowOption, LineNumberOption, LocalVariableOption, RenameOption,
};
use jarcloak_transform::crasher::BAIT_ENTRY;
use jarcloak_transform::entries::InputEntry;
use jarcloak_transform::{DegradationKind, ObfuscationConfig};

/// `a/Main` starting an `a/Worker` that prints, adds literals and keeps a counter.
fn app() -> Vec<ClassModel> {
    let mut main = class("a/Main", OBJECT);
    main.methods.push(method(
        access::PUBLIC | access::STATIC,
        "main",
        "([Ljava/lang/String;)V",
        [
            Insn::type_insn(Opcode::NEW, "a/Worker"),
            Insn::op(Opcode::DUP),
            Insn::method(Opcode::INVOKESPECIAL, "a/Worker", "<init>", "()V"),
            Insn::method(Opcode::INVOKEVIRTUAL, "a/Worker", "run", "()V"),
            Insn::op(Opcode::RETURN),
        ],
    ));

    let mut worker = class("a/Worker", OBJECT);
    worker.fields.push(field(access::PRIVATE, "count", "I"));
    let mut greeting = field(access::PRIVATE | access::STATIC | access::FINAL, "GREETING", STRING);
    greeting.value = Some(jarcloak_core::Constant::String("hello".into()));
    worker.fields.push(greeting);
    let skip = Label::new();
    worker.methods.push(method(
        access::PUBLIC,
        "run",
        "()V",
        [
            Insn::field(Opcode::GETSTATIC, "java/lang/System", "out", "Ljava/io/PrintStream;"),
            Insn::field(Opcode::GETSTATIC, "a/Worker", "GREETING", STRING),
            Insn::method(Opcode::INVOKEVIRTUAL, "java/io/PrintStream", "println", "(Ljava/lang/String;)V"),
            this(),
            this(),
            Insn::field(Opcode::GETFIELD, "a/Worker", "count", "I"),
            Insn::push_int(1000),
            Insn::op(Opcode::IADD),
            Insn::field(Opcode::PUTFIELD, "a/Worker", "count", "I"),
            this(),
            Insn::field(Opcode::GETFIELD, "a/Worker", "count", "I"),
            Insn::jump(Opcode::IFLE, skip),
            Insn::field(Opcode::GETSTATIC, "java/lang/System", "out", "Ljava/io/PrintStream;"),
            Insn::Ldc(jarcloak_core::Constant::String("positive".into())),
            Insn::method(Opcode::INVOKEVIRTUAL, "java/io/PrintStream", "println", "(Ljava/lang/String;)V"),
            Insn::Label(skip),
            Insn::push_long(123_456_789),
            Insn::op(Opcode::POP2),
            Insn::op(Opcode::RETURN),
        ],
    ));
    vec![main, worker]
}

fn manifest() -> InputEntry {
    InputEntry::new(
        "META-INF/MANIFEST.MF",
        b"Manifest-Version: 1.0\nMain-Class: a.Main\n".to_vec(),
    )
}

fn everything_on() -> ObfuscationConfig {
    let mut config = config();
    let options = &mut config.options;
    options.rename = RenameOption::Alphabet;
    options.line_numbers = LineNumberOption::Randomize;
    options.local_variables = LocalVariableOption::Obfuscate;
    options.remove_source_file = true;
    options.shuffle = true;
    options.remove_inner_classes = true;
    options.control_flow = ControlFlowOption::Heavy;
    options.constants = ConstantOption::Flow;
    options.crasher = true;
    options.watermark.dummy_class = true;
    options.watermark.text_inside_class = true;
    options.watermark.unused_string = true;
    options.watermark.zip_comment = true;
    config.constants.injection_rate = 1.0;
    config
}

#[test]
fn full_job_output_parses_and_respects_the_code_size_limit() {
    let mut entries = entries(&app());
    entries.push(manifest());
    let result = run_entries(entries, everything_on());
    let report = &result.report;
    assert_eq!(report.transformers.len(), 15, "{:?}", report.transformers);
    assert_eq!(report.classes_in, 2);
    assert_eq!(report.classes_out, 2);
    assert!(report.injected.iter().any(|e| e == BAIT_ENTRY));
    assert!(report.injected.iter().any(|e| e == "obfuscated/with/jarcloak.class"));
    assert_eq!(result.archive.comment.as_deref(), Some("Obfuscated with jarcloak"));

    let classes = output_classes(&result);
    for class in &classes {
        for method in &class.methods {
            assert!(
                method.instructions.code_size() <= MAX_CODE_SIZE,
                "{}.{}",
                class.name,
                method.name
            );
        }
    }

    let main = classes
        .iter()
        .find(|c| c.method("main", "([Ljava/lang/String;)V").is_some())
        .expect("entry point kept its name");
    assert_ne!(main.name, "a/Main");
    let text = std::str::from_utf8(result.archive.get("META-INF/MANIFEST.MF").unwrap()).unwrap();
    assert!(
        text.contains(&format!("Main-Class: {}\n", main.name.replace('/', "."))),
        "{text}"
    );
}

#[test]
fn a_seed_reproduces_the_output_regardless_of_threads() {
    let entries = || {
        let mut entries = entries(&app());
        entries.push(manifest());
        entries
    };
    let sequential = run_entries(entries(), everything_on());
    let parallel = run_entries(
        entries(),
        ObfuscationConfig {
            parallel: true,
            ..everything_on()
        },
    );
    let listing = |archive: &jarcloak_transform::entries::OutputArchive| -> Vec<(String, Vec<u8>)> {
        archive
            .iter()
            .map(|(name, bytes)| (name.to_string(), bytes.to_vec()))
            .collect()
    };
    assert_eq!(listing(&sequential.archive), listing(&parallel.archive));
    assert_eq!(sequential.report.seed, 42);
}

#[test]
fn duplicate_entries_keep_the_first_occurrence() {
    let mut first = class("a/A", OBJECT);
    first.fields.push(field(access::PRIVATE, "first", "I"));
    let mut second = class("a/A", OBJECT);
    second.fields.push(field(access::PRIVATE, "second", "I"));
    let mut entries = entries(&[first, second]);
    entries.push(InputEntry::new("config.txt", b"one".to_vec()));
    entries.push(InputEntry::new("config.txt", b"two".to_vec()));

    let result = run_entries(entries, config());
    assert_eq!(result.archive.len(), 2);
    assert_eq!(result.archive.get("config.txt"), Some(&b"one"[..]));
    let classes = output_classes(&result);
    assert_eq!(classes[0].fields[0].name, "first");
    assert_eq!(result.report.duplicates_skipped, 2);
    assert_eq!(result.report.count(DegradationKind::DuplicateEntry), 2);
}

/// An instance method of `sites` calls, close enough to the size limit that guarding every
/// call pushes it over.
fn oversized(sites: usize) -> MethodModel {
    let mut method = MethodModel::new(access::PUBLIC, "big", "()V");
    for _ in 0..sites {
        method.instructions.extend([
            this(),
            Insn::method(Opcode::INVOKEVIRTUAL, "a/Big", "tick", "()V"),
        ]);
    }
    method.instructions.push(Insn::op(Opcode::RETURN));
    method
}

#[test]
fn oversized_guarded_methods_are_reverted() {
    let mut big = class("a/Big", OBJECT);
    big.methods.push(empty("tick"));
    big.methods.push(oversized(12_000));
    let original = big.methods[2].instructions.real_len();

    let mut config = config();
    config.options.control_flow = ControlFlowOption::Light;
    config.limits.max_code_size = MAX_CODE_SIZE;
    let result = run(&[big], config);

    let reverts: Vec<_> = result
        .report
        .degradations
        .iter()
        .filter(|d| d.kind == DegradationKind::SizeRevert)
        .collect();
    assert_eq!(reverts.len(), 1, "{:?}", result.report.degradations);
    assert_eq!(reverts[0].transformer, "LightControlFlow");
    assert_eq!(reverts[0].target, "a/Big.big()V");

    let output = output_classes(&result);
    let big = find(&output, "a/Big");
    let kept = big.method("big", "()V").unwrap();
    assert_eq!(kept.instructions.real_len(), original, "original code written back");
    assert!(!kept.instructions.iter().any(|i| matches!(i, Insn::Jump { .. })));
    let tick = big.method("tick", "()V").unwrap();
    assert!(
        tick.instructions.iter().any(|i| matches!(
            i,
            Insn::Jump { .. } | Insn::TableSwitch { .. } | Insn::LookupSwitch { .. }
        )),
        "small methods still get a branch"
    );
}

#[test]
fn missing_library_types_fall_back_to_object() {
    let (other, join) = (Label::new(), Label::new());
    let new = |owner: &str| {
        [
            Insn::type_insn(Opcode::NEW, owner),
            Insn::op(Opcode::DUP),
            Insn::method(Opcode::INVOKESPECIAL, owner, "<init>", "()V"),
        ]
    };
    let mut pick = MethodModel::new(access::PUBLIC | access::STATIC, "pick", "(Z)Ljava/lang/Object;");
    pick.instructions.extend([
        Insn::Var {
            opcode: Opcode::ILOAD,
            index: 0,
        },
        Insn::jump(Opcode::IFEQ, other),
    ]);
    pick.instructions.extend(new("lib/Left"));
    pick.instructions.extend([Insn::jump(Opcode::GOTO, join), Insn::Label(other)]);
    pick.instructions.extend(new("lib/Right"));
    pick.instructions.extend([Insn::Label(join), Insn::op(Opcode::ARETURN)]);
    let mut picker = class("p/Picker", OBJECT);
    picker.methods.push(pick);

    let result = run(&[picker], config());
    assert!(result.archive.contains("p/Picker.class"), "job completes with output");
    let fallbacks: Vec<_> = result
        .report
        .degradations
        .iter()
        .filter(|d| d.kind == DegradationKind::ResolutionFallback)
        .collect();
    assert!(!fallbacks.is_empty());
    assert!(fallbacks.iter().all(|d| d.target == "p/Picker"));
    assert_eq!(result.report.count(DegradationKind::ClassSkipped), 0);
}

/// `static InputStream open(boolean)` opening a file or gunzipping stdin, with one handler for
/// both `FileNotFoundException` and `ZipException`.
fn stream_opener() -> ClassModel {
    let (start, end, handler) = (Label::new(), Label::new(), Label::new());
    let (gzip, join) = (Label::new(), Label::new());
    let var = |opcode, index| Insn::Var { opcode, index };
    let mut open = MethodModel::new(
        access::PUBLIC | access::STATIC,
        "open",
        "(Z)Ljava/io/InputStream;",
    );
    open.instructions.extend([
        Insn::Label(start),
        var(Opcode::ILOAD, 0),
        Insn::jump(Opcode::IFEQ, gzip),
        Insn::type_insn(Opcode::NEW, "java/io/FileInputStream"),
        Insn::op(Opcode::DUP),
        Insn::Ldc(jarcloak_core::Constant::String("in.dat".into())),
        Insn::method(Opcode::INVOKESPECIAL, "java/io/FileInputStream", "<init>", "(Ljava/lang/String;)V"),
        Insn::jump(Opcode::GOTO, join),
        Insn::Label(gzip),
        Insn::type_insn(Opcode::NEW, "java/util/zip/GZIPInputStream"),
        Insn::op(Opcode::DUP),
        Insn::field(Opcode::GETSTATIC, "java/lang/System", "in", "Ljava/io/InputStream;"),
        Insn::method(Opcode::INVOKESPECIAL, "java/util/zip/GZIPInputStream", "<init>", "(Ljava/io/InputStream;)V"),
        Insn::Label(join),
        var(Opcode::ASTORE, 1),
        Insn::Label(end),
        var(Opcode::ALOAD, 1),
        Insn::op(Opcode::ARETURN),
        Insn::Label(handler),
        var(Opcode::ASTORE, 1),
        Insn::op(Opcode::ACONST_NULL),
        Insn::op(Opcode::ARETURN),
    ]);
    for exception in ["java/io/FileNotFoundException", "java/util/zip/ZipException"] {
        open.try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: Some(exception.to_string()),
        });
    }
    let mut opener = class("io/Opener", OBJECT);
    opener.methods.push(open);
    opener
}

#[test]
fn jdk_stream_merges_keep_their_library_types() {
    let result = run(&[stream_opener()], config());
    assert_eq!(result.report.count(DegradationKind::ResolutionFallback), 0);
    assert_eq!(result.report.count(DegradationKind::FrameFallback), 0);

    let output = output_classes(&result);
    let opener = find(&output, "io/Opener");
    let open = opener.methods.iter().find(|m| m.name == "open").unwrap();
    let stacks: Vec<&[VerificationType]> = open
        .instructions
        .iter()
        .filter_map(|insn| match insn {
            Insn::Frame(frame) => Some(frame.stack.as_slice()),
            _ => None,
        })
        .collect();
    let object = |name: &str| VerificationType::Object(name.to_string());
    assert!(
        stacks.contains(&[object("java/io/InputStream")].as_slice()),
        "branch join: {stacks:?}"
    );
    assert!(
        stacks.contains(&[object("java/io/IOException")].as_slice()),
        "shared handler: {stacks:?}"
    );
    assert!(!stacks.contains(&[object(OBJECT)].as_slice()), "{stacks:?}");
}
