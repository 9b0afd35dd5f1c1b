use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand, ValueEnum};

use ezstate::expr::{literal, ExprDecoder, OpcodeTable};
use ezstate::names::CommandCatalog;
use ezstate::{BuildOptions, CommandList, EsdScript};

#[derive(ClapParser, Debug)]
#[command(version, about = "EzState (ESD) script inspector and repacker")]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Variant {
    Basic,
    Extended,
}

#[derive(clap::Args, Debug)]
struct DecodeArgs {
    #[arg(short, long)]
    input: PathBuf,

    /// Built-in opcode table.
    #[arg(long, value_enum, default_value = "extended")]
    variant: Variant,

    /// Opcode table yaml, overrides --variant.
    #[arg(long)]
    opcodes: Option<PathBuf>,

    /// Parenthesise both sides of `and` / `or`.
    #[arg(long)]
    full_brackets: bool,

    #[arg(long, default_value_t = ezstate::graph::DEFAULT_MAX_SUBCONDITION_DEPTH)]
    max_depth: usize,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print every state, or export the graph as yaml.
    Inspect {
        #[command(flatten)]
        decode: DecodeArgs,

        /// Write yaml here instead of printing a summary.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Command name catalog yaml.
        #[arg(long)]
        commands: Option<PathBuf>,
    },
    /// Decode, optionally replace command arguments, and write the file back.
    Repack {
        #[command(flatten)]
        decode: DecodeArgs,

        #[arg(short, long)]
        output: PathBuf,

        /// STATE:LIST:COMMAND:ARG=VALUE, LIST being enter, exit or unknown.
        #[arg(long = "set", value_parser = parse_edit)]
        edits: Vec<ArgEdit>,
    },
}

#[derive(Debug, Clone)]
struct ArgEdit {
    state: usize,
    list: CommandList,
    command: usize,
    arg: usize,
    raw: Vec<u8>,
}

fn parse_edit(s: &str) -> std::result::Result<ArgEdit, String> {
    let (path, value) = s.split_once('=').ok_or("expected STATE:LIST:COMMAND:ARG=VALUE")?;
    let parts: Vec<&str> = path.split(':').collect();
    let [state, list, command, arg] = parts.as_slice() else {
        return Err(format!("expected four ':'-separated fields, got {}", parts.len()));
    };
    let index = |v: &str| v.parse::<usize>().map_err(|e| format!("{v}: {e}"));
    let list = match *list {
        "enter" => CommandList::Enter,
        "exit" => CommandList::Exit,
        "unknown" => CommandList::Unknown,
        other => return Err(format!("unknown command list {other}")),
    };
    let raw = if value.contains('.') {
        literal::f32_line(value.parse::<f32>().map_err(|e| format!("{value}: {e}"))?)
    } else {
        literal::int_line(value.parse::<i32>().map_err(|e| format!("{value}: {e}"))?)
    };
    Ok(ArgEdit {
        state: index(*state)?,
        list,
        command: index(*command)?,
        arg: index(*arg)?,
        raw,
    })
}

fn build_options(args: &DecodeArgs) -> Result<BuildOptions> {
    let opcodes = match &args.opcodes {
        Some(path) => OpcodeTable::load(path)?,
        None => match args.variant {
            Variant::Basic => OpcodeTable::basic(),
            Variant::Extended => OpcodeTable::extended(),
        },
    };
    Ok(BuildOptions {
        opcodes,
        full_brackets: args.full_brackets,
        max_subcondition_depth: args.max_depth,
    })
}

fn load(args: &DecodeArgs, options: &BuildOptions) -> Result<EsdScript> {
    let bytes = fs::read(&args.input).with_context(|| format!("read {}", args.input.display()))?;
    EsdScript::parse(&bytes, options).with_context(|| format!("decode {}", args.input.display()))
}

fn print_summary(script: &EsdScript, catalog: &CommandCatalog) {
    for (slot, name) in script.names().iter().enumerate() {
        if let Some(name) = name {
            println!("name[{slot}]: {name}");
        }
    }
    for state in &script.states {
        println!("state {} -> {:?}", state.index, script.successors(state.index));
        for (label, list) in [
            ("enter", CommandList::Enter),
            ("exit", CommandList::Exit),
            ("unknown", CommandList::Unknown),
        ] {
            for cmd in state.commands(list) {
                println!("  {label}: {}", cmd.signature(catalog));
            }
        }
        for c in &state.conditions {
            let target = c.next_state.map_or("-".to_string(), |n| n.to_string());
            println!("  if {} => {target}", c.expression.text);
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    match args.command {
        Cmd::Inspect {
            decode,
            output,
            commands,
        } => {
            let options = build_options(&decode)?;
            let script = load(&decode, &options)?;
            match output {
                Some(path) => write_file(&path, script.to_yaml()?.as_bytes())?,
                None => {
                    let catalog = match commands {
                        Some(path) => CommandCatalog::load(path)?,
                        None => CommandCatalog::builtin(),
                    };
                    print_summary(&script, &catalog);
                }
            }
        }
        Cmd::Repack {
            decode,
            output,
            edits,
        } => {
            let options = build_options(&decode)?;
            let mut script = load(&decode, &options)?;
            let decoder =
                ExprDecoder::new(&options.opcodes).with_full_brackets(options.full_brackets);
            for edit in edits {
                let Some(arg) =
                    script.command_arg_mut(edit.state, edit.list, edit.command, edit.arg)
                else {
                    bail!(
                        "no argument {} on command {} of state #{} ({:?})",
                        edit.arg,
                        edit.command,
                        edit.state,
                        edit.list
                    );
                };
                log::info!("replacing `{}` ({})", arg.text, arg.hex());
                arg.replace_raw(edit.raw, &decoder);
            }
            let bytes = script.to_bytes().context("repack")?;
            write_file(&output, &bytes)?;
            log::info!("wrote {} bytes to {}", bytes.len(), output.display());
        }
    }
    Ok(())
}
