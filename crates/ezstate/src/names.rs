//! Display names for command ids.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandName {
    Unnamed,
    NameOnly(String),
    NameWithArgs { name: String, args: Vec<String> },
}

impl CommandName {
    pub fn name(&self) -> Option<&str> {
        match self {
            CommandName::Unnamed => None,
            CommandName::NameOnly(name) | CommandName::NameWithArgs { name, .. } => Some(name),
        }
    }

    /// Name of argument `i`, when the table documents it.
    pub fn arg_name(&self, i: usize) -> Option<&str> {
        match self {
            CommandName::NameWithArgs { args, .. } => args.get(i).map(String::as_str),
            _ => None,
        }
    }
}

fn with_args(name: &str, args: &[&str]) -> CommandName {
    CommandName::NameWithArgs {
        name: name.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
    }
}

lazy_static! {
    static ref BUILTIN: BTreeMap<i32, CommandName> = BTreeMap::from([
        (-1, CommandName::NameOnly("(NULL)".into())),
        // Menu scripts only.
        (0, CommandName::NameOnly("StateDescription".into())),
        (1, with_args("PlayDialogue", &["talk_param_id", "arg2", "arg3"])),
        (6, with_args("ShowActionPrompt", &["text_id"])),
        (11, with_args("SetEventFlag", &["event_flag_id", "state"])),
        (
            17,
            with_args(
                "DisplayTextDialog",
                &["arg1", "text_id", "button_type", "number_buttons", "display_distance"],
            ),
        ),
        (19, with_args("DisplayMenuItem", &["menu_index", "item_name", "required_flag"])),
        (22, with_args("AddShopLineup", &["param_start", "param_end"])),
        (24, with_args("OpenReinforceMenu", &["menu_type"])),
        (49, with_args("AddAscensionMenu", &["required_flag", "?menu?"])),
    ]);
}

/// Command id -> name table used when rendering commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCatalog {
    pub commands: BTreeMap<i32, CommandName>,
}

impl CommandCatalog {
    pub fn builtin() -> Self {
        Self {
            commands: BUILTIN.clone(),
        }
    }

    pub fn lookup(&self, id: i32) -> CommandName {
        self.commands.get(&id).cloned().unwrap_or(CommandName::Unnamed)
    }

    pub fn display_name(&self, id: i32) -> String {
        match self.commands.get(&id).and_then(CommandName::name) {
            Some(name) => name.to_string(),
            None => format!("Unknown ({id})"),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).context("parse command catalog yaml")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("read command catalog: {}", path.display()))?;
        Self::from_yaml_str(&txt)
    }
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
