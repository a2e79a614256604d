//! The obfuscation pipeline.
//!
//! A job runs in strictly sequential phases:
//!
//! 1. load: split entries into classes and resources, drop duplicates and `module-info`
//! 2. renamers: each enabled renamer claims names, in input order
//! 3. global remap: all symbol maps applied to every class at once
//! 4. pre hooks, then every other enabled transformer, then post hooks
//! 5. write: resources, then classes through the writer fallback chain, then output hooks
//!
//! Load failures abort the job before anything is produced. Everything after loading degrades
//! per class or per method and is reported in [`ObfuscationReport`].
use crate::config::ObfuscationConfig;
use crate::constant::ConstantTransformer;
use crate::context::{JobContext, MemberIndex};
use crate::control_flow::{HeavyControlFlow, LightControlFlow};
use crate::crasher::Crasher;
use crate::debug_info::{
    InnerClassTransformer, LineNumberTransformer, LocalVariableTransformer, SourceFileTransformer,
};
use crate::entries::{InputEntry, OutputArchive, Resource};
use crate::exclusion::ExclusionMatcher;
use crate::guard::{Degradation, DegradationKind};
use crate::remap::{remap_all, Remapper};
use crate::renamer::{ClassRenamer, FieldRenamer, MethodRenamer};
use crate::shuffle::Shuffle;
use crate::watermark::{DummyClass, TextInsideClass, UnusedString, ZipComment};
use crate::writer::ClassWriter;
use crate::{pass, Transform};
use jarcloak_analysis::metrics::{self, SizeTotals};
use jarcloak_core::{decoder, ClassModel, ClassPath, HierarchyIndex};
use jarcloak_utils::errors::{CapacityError, ConstructionError, InputError, ObfuscateError};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Phase name used in degradation records of the load and write phases.
const PIPELINE: &str = "Pipeline";

/// Upper bound on classes or resources in one job.
const MAX_ENTRIES: usize = i32::MAX as usize;

/// Every transformer in execution order. Built fresh for each job because renamers carry
/// their symbol maps.
pub fn transformers() -> Vec<Box<dyn Transform>> {
    vec![
        Box::new(ClassRenamer::new()),
        Box::new(FieldRenamer::new()),
        Box::new(MethodRenamer::new()),
        Box::new(LightControlFlow::new()),
        Box::new(HeavyControlFlow::new()),
        Box::new(ConstantTransformer::new()),
        Box::new(LocalVariableTransformer::new()),
        Box::new(LineNumberTransformer::new()),
        Box::new(SourceFileTransformer::new()),
        Box::new(DummyClass::new()),
        Box::new(TextInsideClass::new()),
        Box::new(UnusedString::new()),
        Box::new(ZipComment::new()),
        Box::new(Crasher::new()),
        Box::new(Shuffle::new()),
        Box::new(InnerClassTransformer::new()),
    ]
}

/// Summary of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObfuscationReport {
    /// The job seed; passing it back in reproduces the output.
    pub seed: u64,
    /// Enabled transformers in execution order.
    pub transformers: Vec<String>,
    pub classes_in: usize,
    pub classes_out: usize,
    pub resources: usize,
    /// Entries added by transformers.
    pub injected: Vec<String>,
    pub duplicates_skipped: usize,
    pub size_before: SizeTotals,
    pub size_after: SizeTotals,
    /// Relative code growth, see [`metrics::growth`].
    pub growth: f64,
    pub degradations: Vec<Degradation>,
    /// Set when the job stopped early; the archive holds the entries written until then.
    pub cancelled: bool,
}

impl ObfuscationReport {
    /// Recorded degradations of one kind.
    pub fn count(&self, kind: DegradationKind) -> usize {
        self.degradations.iter().filter(|d| d.kind == kind).count()
    }
}

/// The output archive and the report of a job.
#[derive(Debug, Clone)]
pub struct ObfuscationResult {
    pub archive: OutputArchive,
    pub report: ObfuscationReport,
}

/// Entries after the load phase.
#[derive(Debug, Default)]
struct Loaded {
    classes: Vec<ClassModel>,
    resources: Vec<Resource>,
    duplicates: Vec<Degradation>,
}

fn load(entries: Vec<InputEntry>) -> Result<Loaded, ObfuscateError> {
    let mut loaded = Loaded::default();
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.is_directory() {
            continue;
        }
        if !seen.insert(entry.name.clone()) {
            warn!("duplicate entry {}, keeping the first one", entry.name);
            loaded.duplicates.push(Degradation::new(
                PIPELINE,
                &entry.name,
                DegradationKind::DuplicateEntry,
                "entry name already seen",
            ));
            continue;
        }
        if entry.name.ends_with(".class") && !entry.name.starts_with("META-INF/") {
            let class = decoder::read_class(&entry.bytes).map_err(|source| InputError::CorruptClass {
                entry: entry.name.clone(),
                source,
            })?;
            if class.is_module_info() {
                debug!("dropping {}", entry.name);
                continue;
            }
            loaded.classes.push(class);
        } else {
            loaded.resources.push(Resource::new(entry.name, entry.bytes));
        }
    }
    if loaded.classes.is_empty() {
        return Err(InputError::NoClasses.into());
    }
    if loaded.classes.len() > MAX_ENTRIES {
        return Err(CapacityError::TooManyClasses(loaded.classes.len()).into());
    }
    if loaded.resources.len() > MAX_ENTRIES {
        return Err(CapacityError::TooManyResources(loaded.resources.len()).into());
    }
    Ok(loaded)
}

/// Runs obfuscation jobs with one configuration.
#[derive(Debug)]
pub struct Obfuscator {
    config: ObfuscationConfig,
    exclusions: ExclusionMatcher,
    library: ClassPath,
    cancel: Option<Arc<AtomicBool>>,
}

impl Obfuscator {
    /// Validates `config`. The library class path starts out with the built-in JDK types.
    pub fn new(config: ObfuscationConfig) -> Result<Self, ConstructionError> {
        config.validate()?;
        let exclusions = ExclusionMatcher::new(&config.exclusions);
        debug!("{} exclusion rules", exclusions.len());
        Ok(Self {
            config,
            exclusions,
            library: ClassPath::with_jdk(),
            cancel: None,
        })
    }

    /// Replaces the library class path used to resolve types outside the input.
    pub fn with_library(mut self, library: ClassPath) -> Self {
        self.library = library;
        self
    }

    /// A flag that stops the job before the next output entry once set.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub const fn config(&self) -> &ObfuscationConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Runs one job over the entries of an input archive.
    pub fn run(&self, entries: Vec<InputEntry>) -> Result<ObfuscationResult, ObfuscateError> {
        let Loaded {
            mut classes,
            mut resources,
            duplicates,
        } = load(entries)?;
        let config = &self.config;
        let seed = config.seed.unwrap_or_else(|| {
            let seed = rand::rng().random();
            info!("{:>14} {seed}", "Seed");
            seed
        });
        let parallel = config.parallel;
        info!(
            "{:>14} {} classes, {} resources",
            "Loaded",
            classes.len(),
            resources.len()
        );

        let mut report = ObfuscationReport {
            seed,
            classes_in: classes.len(),
            resources: resources.len(),
            duplicates_skipped: duplicates.len(),
            size_before: metrics::size_totals(&classes),
            degradations: duplicates,
            ..ObfuscationReport::default()
        };

        let transformers: Vec<Box<dyn Transform>> = transformers()
            .into_iter()
            .filter(|t| t.is_enabled(&config.options))
            .collect();
        report.transformers = transformers.iter().map(|t| t.name().to_string()).collect();
        let (renamers, others): (Vec<&dyn Transform>, Vec<&dyn Transform>) = transformers
            .iter()
            .map(|t| &**t)
            .partition(|t| t.symbols().is_some());

        let remapper = {
            let hierarchy = HierarchyIndex::build(&classes);
            let members = MemberIndex::build(&classes);
            let job = JobContext::new(config, &hierarchy, &members, &self.exclusions, seed);
            let mut map = HashMap::new();
            for renamer in &renamers {
                let summary = pass::run_renamer(*renamer, &mut classes, &mut resources, &job);
                report.degradations.extend(summary.degradations);
                if let Some(symbols) = renamer.symbols() {
                    map.extend(symbols.snapshot());
                }
            }
            Remapper::new(map)
        };
        if !remapper.is_empty() {
            classes = remap_all(classes, &remapper, parallel);
            info!("{:>14} applied", "Remap");
        }

        let hierarchy = HierarchyIndex::build(&classes);
        let members = MemberIndex::build(&classes);
        let job = JobContext::new(config, &hierarchy, &members, &self.exclusions, seed);
        for transform in &others {
            transform.pre(&mut classes, &job);
        }
        for transform in &others {
            let summary = pass::run_transformer(*transform, &mut classes, &job, parallel);
            report.degradations.extend(summary.degradations);
        }
        for transform in &others {
            transform.post(&mut classes, &job);
        }
        report.size_after = metrics::size_totals(&classes);
        report.growth = metrics::growth(&report.size_before, &report.size_after);

        let mut archive = OutputArchive::new();
        for resource in resources {
            if self.cancelled() {
                report.cancelled = true;
                break;
            }
            if resource.modified {
                debug!("rewrote {}", resource.name);
            }
            archive.push(resource.name, resource.bytes);
        }

        if !report.cancelled {
            let writer = ClassWriter::new(&classes, &self.library);
            let written: Vec<_> = if parallel {
                classes.par_iter().map(|class| writer.write(class)).collect()
            } else {
                classes.iter().map(|class| writer.write(class)).collect()
            };
            for class in written {
                if self.cancelled() {
                    report.cancelled = true;
                    break;
                }
                report.degradations.extend(class.degradations);
                let Some(bytes) = class.bytes else {
                    continue;
                };
                let entry = format!("{}.class", class.name);
                if archive.push(entry.clone(), bytes) {
                    report.classes_out += 1;
                } else {
                    warn!("duplicate class {}, keeping the first one", class.name);
                    report.duplicates_skipped += 1;
                    report.degradations.push(Degradation::new(
                        PIPELINE,
                        entry,
                        DegradationKind::DuplicateEntry,
                        "class name already written",
                    ));
                }
            }
        }

        if !report.cancelled {
            for transform in &transformers {
                transform.transform_output(&mut archive, &job);
            }
        } else {
            warn!("job cancelled, output is incomplete");
        }
        report.injected = archive.injected().to_vec();
        info!(
            "{:>14} {} classes, {} entries, {} degradations",
            "Written",
            report.classes_out,
            archive.len(),
            report.degradations.len()
        );
        Ok(ObfuscationResult { archive, report })
    }
}

/// Runs one job with `config` and the built-in library class path.
pub fn obfuscate(
    entries: Vec<InputEntry>,
    config: ObfuscationConfig,
) -> Result<ObfuscationResult, ObfuscateError> {
    Obfuscator::new(config)?.run(entries)
}
