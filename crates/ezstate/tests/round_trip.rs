mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;

use common::*;
use ezstate::expr::literal;
use ezstate::expr::{ExprDecoder, OpcodeTable};
use ezstate::names::CommandCatalog;
use ezstate::tables::RawTables;
use ezstate::{BuildOptions, CommandList, EncodeError, EsdScript};

#[test]
fn fixture_decodes_to_expected_graph() -> Result<()> {
    let script = EsdScript::parse(&fixture(), &BuildOptions::default())?;
    assert_eq!(script.states.len(), 2);

    let s10 = script.state(10).expect("state 10");
    let s20 = script.state(20).expect("state 20");

    assert_eq!(s10.conditions.len(), 2);
    assert_eq!(s10.conditions[0].next_state, Some(20));
    assert_eq!(s10.conditions[0].expression.text, "(&GetPlayerDistance(5) < 3)");
    assert_eq!(s10.conditions[1].next_state, Some(10));
    assert_eq!(s10.conditions[1].expression.text, "1");

    // Shared row, materialised once per referencing state.
    assert_eq!(s20.conditions[0], s10.conditions[1]);

    let nested = &s20.conditions[1];
    assert_eq!(nested.next_state, None);
    assert_eq!(nested.expression.text, "(& == 2)");
    assert_eq!(nested.subconditions.len(), 1);
    assert_eq!(nested.subconditions[0].expression.text, "161");
    assert_eq!(nested.subconditions[0].next_state, Some(10));

    let catalog = CommandCatalog::builtin();
    assert_eq!(
        s10.enter_commands[0].signature(&catalog),
        "PlayDialogue(talk_param_id=100, arg2=0)"
    );
    assert_eq!(
        s10.conditions[1].commands[0].signature(&catalog),
        "SetEventFlag(event_flag_id=7, state=&)"
    );
    assert_eq!(s20.exit_commands[0].args[0].text, "-1");
    assert!(s20.enter_commands.is_empty());

    assert_eq!(script.names()[0].as_deref(), Some(NAME));
    assert_eq!(script.names()[1], None);
    assert_eq!(script.successors(10), vec![20, 10]);
    assert_eq!(script.successors(20), vec![10]);
    Ok(())
}

#[test]
fn registers_reset_per_state_and_skip_command_arguments() -> Result<()> {
    let script = EsdScript::parse(&fixture(), &BuildOptions::default())?;

    // State 10 stores register 0 before reading it back.
    let s10 = script.state(10).expect("state 10");
    assert_eq!(s10.conditions[0].expression.text, "(&GetPlayerDistance(5) < 3)");

    // State 20 starts with empty registers.
    let s20 = script.state(20).expect("state 20");
    assert_eq!(s20.conditions[1].expression.text, "(& == 2)");

    // The argument sits on a condition decoded right after the store, yet sees nothing.
    let flag = &s10.conditions[1].commands[0];
    assert_eq!(flag.args[1].raw, ARG_LOAD_R0);
    assert_eq!(flag.args[1].text, "&");
    assert_eq!(s20.conditions[0].commands[0].args[1].text, "&");
    Ok(())
}

#[test]
fn duplicate_state_index_fails_to_repack() -> Result<()> {
    let mut file = fixture();
    patch_i32(&mut file, field_at(STATES, 36, 1, 0), 10);

    // Decoding still works; next-state pointers are row offsets on disk.
    let script = EsdScript::parse(&file, &BuildOptions::default())?;
    assert_eq!(script.states[0].conditions[0].next_state, Some(10));
    assert_eq!(script.states[1].index, 10);

    assert_eq!(
        script.to_tables().unwrap_err(),
        EncodeError::AmbiguousState { index: 10 }
    );
    Ok(())
}

#[test]
fn unmodified_repack_is_byte_identical() -> Result<()> {
    let file = fixture();
    let script = EsdScript::parse(&file, &BuildOptions::default())?;
    assert_eq!(script.to_bytes()?, file);
    Ok(())
}

#[test]
fn repack_keeps_row_counts_and_sharing() -> Result<()> {
    let file = fixture();
    let before = RawTables::parse(&file)?;
    let script = EsdScript::from_tables(&before, &BuildOptions::default())?;
    let after = script.to_tables()?;

    assert_eq!(after.states.len(), before.states.len());
    assert_eq!(after.conditions.len(), 4);
    assert_eq!(after.commands.len(), before.commands.len());
    assert_eq!(after.args.len(), before.args.len());
    assert_eq!(after.condition_ptrs.len(), 5);
    assert_eq!(after.layout, before.layout);
    Ok(())
}

#[test]
fn argument_edit_only_touches_that_argument() -> Result<()> {
    let options = BuildOptions::default();
    let original = EsdScript::parse(&fixture(), &options)?;

    let mut edited = original.clone();
    let decoder = ExprDecoder::new(&options.opcodes);
    let arg = edited
        .command_arg_mut(0, CommandList::Enter, 0, 0)
        .expect("first enter argument");
    assert_eq!(arg.text, "100");
    // Shrinks the blob by four bytes and moves the tail.
    arg.replace_raw(literal::int_line(5), &decoder);

    let bytes = edited.to_bytes()?;
    assert_eq!(bytes.len(), fixture().len() - 4);

    let reread = EsdScript::parse(&bytes, &options)?;
    assert_eq!(reread.states[0].enter_commands[0].args[0].text, "5");
    assert_eq!(
        reread.states[0].enter_commands[0].args[1],
        original.states[0].enter_commands[0].args[1]
    );
    assert_eq!(reread.states[0].conditions, original.states[0].conditions);
    assert_eq!(reread.states[1], original.states[1]);
    assert_eq!(reread.names()[0].as_deref(), Some(NAME));

    let tables = RawTables::parse(&bytes)?;
    assert_eq!(tables.header.state_count, 2);
    assert_eq!(tables.header.condition_count, 4);
    assert_eq!(tables.header.command_count, 3);
    assert_eq!(tables.header.arg_count, 5);
    assert_eq!(tables.header.condition_ptr_count, 5);
    assert_eq!(tables.header.data_size as usize, bytes.len() - HEADER);
    assert_eq!(tables.header.names[0].offset as usize, tables.layout.tail);
    Ok(())
}

#[test]
fn full_brackets_and_basic_table() -> Result<()> {
    let options = BuildOptions {
        opcodes: OpcodeTable::basic(),
        full_brackets: true,
        ..BuildOptions::default()
    };
    let script = EsdScript::parse(&fixture(), &options)?;
    assert_eq!(script.states[0].conditions[0].expression.text, "(&GetPlayerDistance(5) < 3)");
    assert_eq!(script.to_bytes()?, fixture());
    Ok(())
}

#[test]
fn yaml_export_lists_states() -> Result<()> {
    let script = EsdScript::parse(&fixture(), &BuildOptions::default())?;
    let yaml = script.to_yaml()?;
    assert!(yaml.contains("index: 10"));
    assert!(yaml.contains("raw: 41 45 85 a7 af 43 93 a1"));
    assert!(yaml.contains(NAME));
    Ok(())
}
