//! Job configuration.
//!
//! Every struct derives `serde` with `#[serde(default)]` so a partial JSON file only overrides
//! the fields it names.
use crate::names::MIN_CONFUSABLE_LENGTH;
use jarcloak_analysis::ComplexityLimits;
use jarcloak_utils::errors::ConstructionError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

macro_rules! option_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            #[default]
            $($variant,)*
        }

        impl $name {
            /// Accepted spellings, for help texts.
            pub const VARIANTS: &'static [&'static str] = &[$($text),*];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)*
                }
            }
        }

        impl FromStr for $name {
            type Err = ConstructionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)*
                    _ => Err(ConstructionError::InvalidOption {
                        option: stringify!($name).to_string(),
                        reason: format!("`{s}` is not one of {}", Self::VARIANTS.join(", ")),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

option_enum! {
    /// Name allocation strategy of the renamers.
    RenameOption {
        Off => "off",
        Alphabet => "alphabet",
        Invisible => "invisible",
        Confusable => "confusable",
    }
}

option_enum! {
    /// Treatment of line number tables.
    LineNumberOption {
        Keep => "keep",
        Delete => "delete",
        Randomize => "randomize",
    }
}

option_enum! {
    /// Treatment of local variable tables.
    LocalVariableOption {
        Keep => "keep",
        Delete => "delete",
        Obfuscate => "obfuscate",
    }
}

option_enum! {
    /// Control flow obfuscation strength.
    ControlFlowOption {
        Off => "off",
        Light => "light",
        Heavy => "heavy",
    }
}

option_enum! {
    /// Constant obfuscation strength.
    ConstantOption {
        Off => "off",
        Light => "light",
        Flow => "flow",
    }
}

/// Watermark transformers and the text each one embeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkOptions {
    pub dummy_class: bool,
    pub dummy_class_text: String,
    pub text_inside_class: bool,
    pub text_inside_class_text: String,
    pub unused_string: bool,
    pub unused_string_text: String,
    pub zip_comment: bool,
    pub zip_comment_text: String,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            dummy_class: false,
            dummy_class_text: "obfuscated/with/jarcloak".to_string(),
            text_inside_class: false,
            text_inside_class_text: "Obfuscated with jarcloak".to_string(),
            unused_string: false,
            unused_string_text: "Obfuscated with jarcloak".to_string(),
            zip_comment: false,
            zip_comment_text: "Obfuscated with jarcloak".to_string(),
        }
    }
}

/// The user-facing option set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationOptions {
    pub rename: RenameOption,
    pub line_numbers: LineNumberOption,
    pub local_variables: LocalVariableOption,
    pub remove_source_file: bool,
    pub shuffle: bool,
    pub remove_inner_classes: bool,
    pub control_flow: ControlFlowOption,
    pub constants: ConstantOption,
    /// Adds a malformed bait entry that breaks naive archive tools.
    pub crasher: bool,
    pub watermark: WatermarkOptions,
}

/// Sampling and size thresholds of the constant obfuscator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantTuning {
    /// Probability that a given literal is encoded.
    pub injection_rate: f64,
    /// Longer string literals are left alone.
    pub max_string_length: usize,
}

impl Default for ConstantTuning {
    fn default() -> Self {
        Self {
            injection_rate: 0.30,
            max_string_length: 128,
        }
    }
}

/// Tuning of the heavy control flow variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlFlowTuning {
    /// Probability that a given call, field access or allocation site is guarded.
    pub heavy_injection_rate: f64,
}

impl Default for ControlFlowTuning {
    fn default() -> Self {
        Self {
            heavy_injection_rate: 0.20,
        }
    }
}

/// Configuration for the obfuscation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    pub options: ObfuscationOptions,
    pub limits: ComplexityLimits,
    pub constants: ConstantTuning,
    pub control_flow: ControlFlowTuning,
    /// Job seed. `None` draws a fresh one.
    pub seed: Option<u64>,
    /// Dispatch classes on the rayon pool.
    pub parallel: bool,
    /// Exclusion rules, one per line.
    pub exclusions: String,
    /// Length of names produced by the confusable strategy.
    pub confusable_length: usize,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            options: ObfuscationOptions::default(),
            limits: ComplexityLimits::default(),
            constants: ConstantTuning::default(),
            control_flow: ControlFlowTuning::default(),
            seed: None,
            parallel: true,
            exclusions: String::new(),
            confusable_length: 400,
        }
    }
}

impl ObfuscationConfig {
    /// Rejects values no transformer can work with.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        let rate = |option: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConstructionError::InvalidOption {
                    option: option.to_string(),
                    reason: format!("{value} is not a probability"),
                })
            }
        };
        rate("constants.injection_rate", self.constants.injection_rate)?;
        rate(
            "control_flow.heavy_injection_rate",
            self.control_flow.heavy_injection_rate,
        )?;
        // long enough to never run dry, short enough for a constant pool entry
        let lengths = MIN_CONFUSABLE_LENGTH..=16_384;
        if !lengths.contains(&self.confusable_length) {
            return Err(ConstructionError::InvalidOption {
                option: "confusable_length".to_string(),
                reason: format!(
                    "{} is outside {}..={}",
                    self.confusable_length,
                    lengths.start(),
                    lengths.end()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ObfuscationConfig = serde_json::from_str(
            r#"{ "options": { "rename": "confusable", "control_flow": "heavy" }, "seed": 7 }"#,
        )
        .unwrap();
        assert_eq!(config.options.rename, RenameOption::Confusable);
        assert_eq!(config.options.control_flow, ControlFlowOption::Heavy);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.constants.max_string_length, 128);
        assert_eq!(config.limits.max_methods, 400);
        assert!(config.parallel, "parallel dispatch is the default");
    }

    #[test]
    fn option_names_parse_case_insensitively() {
        assert_eq!("Flow".parse::<ConstantOption>().unwrap(), ConstantOption::Flow);
        assert_eq!("RANDOMIZE".parse::<LineNumberOption>().unwrap(), LineNumberOption::Randomize);
        let err = "loud".parse::<ControlFlowOption>().unwrap_err();
        assert!(err.to_string().contains("off, light, heavy"), "got {err}");
    }

    #[test]
    fn invalid_rates_are_rejected() {
        let mut config = ObfuscationConfig::default();
        assert!(config.validate().is_ok());
        config.constants.injection_rate = 1.5;
        assert!(config.validate().is_err());
        config.constants.injection_rate = 0.3;
        config.confusable_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn confusable_lengths_must_leave_room_for_every_name() {
        let mut config = ObfuscationConfig::default();
        for length in [1, 4, MIN_CONFUSABLE_LENGTH - 1, 16_385] {
            config.confusable_length = length;
            let err = config.validate().expect_err("length rejected");
            assert!(err.to_string().contains("confusable_length"), "{err}");
        }
        config.confusable_length = MIN_CONFUSABLE_LENGTH;
        assert!(config.validate().is_ok());
    }
}
