//! Opcode tables for the expression decoder.
//!
//! Two variants are known: a basic one seen in talk scripts and an extended
//! one with `!=`, more function ids and UTF-16 string literals. Both are plain
//! data so a corrected table can be loaded from YAML without touching the
//! decoder.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub const COMPARE_OPCODES: std::ops::RangeInclusive<u8> = 0x91..=0x96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum CompareOp {
    #[strum(serialize = "<=")]
    #[serde(rename = "<=")]
    Le,
    #[strum(serialize = ">=")]
    #[serde(rename = ">=")]
    Ge,
    #[strum(serialize = "<")]
    #[serde(rename = "<")]
    Lt,
    #[strum(serialize = ">")]
    #[serde(rename = ">")]
    Gt,
    #[strum(serialize = "==")]
    #[serde(rename = "==")]
    Eq,
    #[strum(serialize = "!=")]
    #[serde(rename = "!=")]
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeTable {
    pub name: String,
    /// Comparison opcodes (0x91..=0x96) this variant recognises.
    pub comparisons: BTreeMap<u8, CompareOp>,
    /// Function names for the 0x84..=0x86 call opcodes.
    #[serde(default)]
    pub functions: BTreeMap<i32, String>,
    /// Whether 0xA5 introduces a zero-terminated UTF-16 string.
    #[serde(default)]
    pub string_literals: bool,
}

fn names(entries: &[(i32, &str)]) -> BTreeMap<i32, String> {
    entries.iter().map(|(k, v)| (*k, v.to_string())).collect()
}

impl OpcodeTable {
    pub fn basic() -> Self {
        Self {
            name: "basic".into(),
            comparisons: BTreeMap::from([
                (0x91, CompareOp::Le),
                (0x92, CompareOp::Ge),
                (0x93, CompareOp::Lt),
                (0x94, CompareOp::Gt),
                (0x95, CompareOp::Eq),
            ]),
            functions: names(&[
                (1, "GetPlayerDistance"),
                (2, "IsDialogueFinished"),
                (3, "ChrIsDead"),
                (4, "GetActionButton"),
                (5, "DamagedByPlayer"),
                (6, "HealthPercentage"),
            ]),
            string_literals: false,
        }
    }

    pub fn extended() -> Self {
        let mut table = Self::basic();
        table.name = "extended".into();
        table.comparisons.insert(0x96, CompareOp::Ne);
        table.functions.extend(names(&[
            (8, "PlayerFacingAngle"),
            (14, "GetPromptState"),
            (15, "GetEventFlagState"),
            (22, "GetYesNoButtonSelection"),
            (23, "GetSelectedMenuIndex"),
        ]));
        table.string_literals = true;
        table
    }

    /// Function name for a call, or a synthesized `F-<index>` label.
    pub fn function_name(&self, index: i32) -> String {
        self.functions
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("F-{index}"))
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let table: OpcodeTable = serde_yaml::from_str(s).context("parse opcode table yaml")?;
        for byte in table.comparisons.keys() {
            if !COMPARE_OPCODES.contains(byte) {
                bail!("comparison opcode {byte:#04x} is outside 0x91..=0x96");
            }
        }
        Ok(table)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("read opcode table: {}", path.display()))?;
        Self::from_yaml_str(&txt).with_context(|| format!("load opcode table: {}", path.display()))
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::extended()
    }
}
