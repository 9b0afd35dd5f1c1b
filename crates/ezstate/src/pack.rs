//! Repacker: flattens a state graph back into the five tables.
//!
//! Rows are appended in graph order into index-form pending tables. Only once
//! every table's length is known are the indices turned into data-region
//! offsets, so the packing pass never has to patch anything it already wrote.
//!
//! Identical conditions collapse into one row. Two conditions are identical
//! when their target state, expression bytes, commands and (already packed)
//! subcondition rows all agree.

use std::collections::HashMap;

use crate::error::{EncodeError, EncodeResult};
use crate::graph::{Command, Condition, State};
use crate::header::{EsdHeader, StateMachineHeader};
use crate::tables::{
    raw_table, ArgRow, CommandRow, ConditionPtrRow, ConditionRow, Layout, RawTables, Row, Span,
    StateRow,
};

/// A contiguous run of rows by index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Run {
    start: usize,
    count: usize,
}

#[derive(Debug)]
struct PendingState {
    index: i32,
    conditions: Run,
    enter: Run,
    exit: Run,
    unknown: Run,
}

#[derive(Debug)]
struct PendingCondition {
    next_state: Option<i32>,
    commands: Run,
    subconditions: Run,
    expr: Run,
}

#[derive(Debug)]
struct PendingCommand {
    bank: i32,
    id: i32,
    args: Run,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct CommandKey {
    bank: i32,
    id: i32,
    args: Vec<Vec<u8>>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct ConditionKey {
    next_state: Option<i32>,
    expr: Vec<u8>,
    commands: Vec<CommandKey>,
    subconditions: Vec<usize>,
}

impl ConditionKey {
    fn new(c: &Condition, subconditions: Vec<usize>) -> Self {
        Self {
            next_state: c.next_state,
            expr: c.expression.raw.clone(),
            commands: c
                .commands
                .iter()
                .map(|cmd| CommandKey {
                    bank: cmd.bank,
                    id: cmd.id,
                    args: cmd.args.iter().map(|a| a.raw.clone()).collect(),
                })
                .collect(),
            subconditions,
        }
    }
}

/// Everything the tables need besides the graph itself.
#[derive(Debug, Clone)]
pub struct PackTemplate<'a> {
    pub header: &'a EsdHeader,
    pub machines: &'a StateMachineHeader,
    pub tail: &'a [u8],
    /// Data-region offset the tail started at when the file was read.
    pub old_tail_offset: usize,
}

#[derive(Debug, Default)]
pub struct Repacker {
    states: Vec<PendingState>,
    conditions: Vec<PendingCondition>,
    commands: Vec<PendingCommand>,
    args: Vec<Run>,
    condition_ptrs: Vec<usize>,
    blob: Vec<u8>,
    cache: HashMap<ConditionKey, usize>,
    shared: usize,
}

fn to_i32(v: usize, what: &'static str) -> EncodeResult<i32> {
    i32::try_from(v).map_err(|_| EncodeError::Overflow { what })
}

/// Stored form of a run in a table starting at `base`.
fn span(run: Run, base: usize, width: usize, what: &'static str) -> EncodeResult<Span> {
    if run.count == 0 {
        return Ok(Span::EMPTY);
    }
    Ok(Span {
        offset: to_i32(base + run.start * width, what)?,
        count: to_i32(run.count, what)?,
    })
}

fn expr_span(run: Run, blob_base: usize) -> EncodeResult<Span> {
    Ok(Span {
        offset: to_i32(blob_base + run.start, "expression offset")?,
        count: to_i32(run.count, "expression size")?,
    })
}

impl Repacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conditions that were folded into an earlier identical row.
    pub fn shared_conditions(&self) -> usize {
        self.shared
    }

    fn push_expr(&mut self, raw: &[u8]) -> Run {
        let run = Run {
            start: self.blob.len(),
            count: raw.len(),
        };
        self.blob.extend_from_slice(raw);
        run
    }

    fn push_condition_ptrs(&mut self, conditions: &[usize]) -> Run {
        let run = Run {
            start: self.condition_ptrs.len(),
            count: conditions.len(),
        };
        self.condition_ptrs.extend_from_slice(conditions);
        run
    }

    fn pack_commands(&mut self, commands: &[Command]) -> Run {
        let run = Run {
            start: self.commands.len(),
            count: commands.len(),
        };
        for cmd in commands {
            let args = Run {
                start: self.args.len(),
                count: cmd.args.len(),
            };
            for arg in &cmd.args {
                let expr = self.push_expr(&arg.raw);
                self.args.push(expr);
            }
            self.commands.push(PendingCommand {
                bank: cmd.bank,
                id: cmd.id,
                args,
            });
        }
        run
    }

    /// Row index of `c`, appending it (and its subconditions first) when no identical row exists.
    fn pack_condition(&mut self, c: &Condition) -> usize {
        let subconditions: Vec<usize> = c
            .subconditions
            .iter()
            .map(|s| self.pack_condition(s))
            .collect();

        let key = ConditionKey::new(c, subconditions);
        if let Some(&existing) = self.cache.get(&key) {
            self.shared += 1;
            return existing;
        }

        let commands = self.pack_commands(&c.commands);
        let subconditions = self.push_condition_ptrs(&key.subconditions);
        let expr = self.push_expr(&c.expression.raw);

        let index = self.conditions.len();
        self.conditions.push(PendingCondition {
            next_state: c.next_state,
            commands,
            subconditions,
            expr,
        });
        self.cache.insert(key, index);
        index
    }

    fn pack_condition_list(&mut self, conditions: &[Condition]) -> Run {
        let rows: Vec<usize> = conditions.iter().map(|c| self.pack_condition(c)).collect();
        self.push_condition_ptrs(&rows)
    }

    pub fn pack_state(&mut self, state: &State) {
        let enter = self.pack_commands(&state.enter_commands);
        let exit = self.pack_commands(&state.exit_commands);
        let unknown = self.pack_commands(&state.unknown_commands);
        let conditions = self.pack_condition_list(&state.conditions);
        self.states.push(PendingState {
            index: state.index,
            conditions,
            enter,
            exit,
            unknown,
        });
    }

    /// Resolve every pending index into an offset and rebuild the headers.
    pub fn finish(self, template: &PackTemplate<'_>) -> EncodeResult<RawTables> {
        let mut machines = template.machines.clone();
        let layout = Layout::compute(
            machines.size(),
            [
                self.states.len(),
                self.conditions.len(),
                self.commands.len(),
                self.args.len(),
                self.condition_ptrs.len(),
            ],
            self.blob.len(),
        );

        // Logical index -> state row; `None` once a second state claims the index.
        let mut positions: HashMap<i32, Option<usize>> = HashMap::new();
        for (pos, s) in self.states.iter().enumerate() {
            positions
                .entry(s.index)
                .and_modify(|slot| *slot = None)
                .or_insert(Some(pos));
        }

        let state_width = StateRow::width();
        let states = self
            .states
            .iter()
            .map(|s| -> EncodeResult<StateRow> {
                Ok(StateRow {
                    index: s.index,
                    conditions: span(
                        s.conditions,
                        layout.condition_ptr,
                        ConditionPtrRow::width(),
                        "condition pointer",
                    )?,
                    enter: span(s.enter, layout.command, CommandRow::width(), "command")?,
                    exit: span(s.exit, layout.command, CommandRow::width(), "command")?,
                    unknown: span(s.unknown, layout.command, CommandRow::width(), "command")?,
                })
            })
            .collect::<EncodeResult<Vec<_>>>()?;

        let conditions = self
            .conditions
            .iter()
            .map(|c| -> EncodeResult<ConditionRow> {
                let next_state = match c.next_state {
                    None => -1,
                    Some(index) => match positions.get(&index) {
                        None => return Err(EncodeError::UnresolvedState { index }),
                        Some(None) => return Err(EncodeError::AmbiguousState { index }),
                        Some(&Some(pos)) => {
                            to_i32(layout.state + pos * state_width, "next state offset")?
                        }
                    },
                };
                Ok(ConditionRow {
                    next_state,
                    commands: span(c.commands, layout.command, CommandRow::width(), "command")?,
                    subconditions: span(
                        c.subconditions,
                        layout.condition_ptr,
                        ConditionPtrRow::width(),
                        "condition pointer",
                    )?,
                    expr: expr_span(c.expr, layout.blob)?,
                })
            })
            .collect::<EncodeResult<Vec<_>>>()?;

        let commands = self
            .commands
            .iter()
            .map(|c| -> EncodeResult<CommandRow> {
                Ok(CommandRow {
                    bank: c.bank,
                    id: c.id,
                    args: span(c.args, layout.arg, ArgRow::width(), "command argument")?,
                })
            })
            .collect::<EncodeResult<Vec<_>>>()?;

        let args = self
            .args
            .iter()
            .map(|&run| -> EncodeResult<ArgRow> {
                Ok(ArgRow {
                    expr: expr_span(run, layout.blob)?,
                })
            })
            .collect::<EncodeResult<Vec<_>>>()?;

        let condition_ptrs = self
            .condition_ptrs
            .iter()
            .map(|&i| -> EncodeResult<ConditionPtrRow> {
                Ok(ConditionPtrRow {
                    condition: to_i32(
                        layout.condition + i * ConditionRow::width(),
                        "condition offset",
                    )?,
                })
            })
            .collect::<EncodeResult<Vec<_>>>()?;

        // State tables are consecutive runs of the state table.
        if machines.machines.len() == 1 {
            machines.machines[0].count = to_i32(states.len(), "state count")?;
        } else {
            let covered: usize = machines.machines.iter().map(|m| m.count.max(0) as usize).sum();
            if covered != states.len() {
                return Err(EncodeError::StateMachinePartition {
                    covered,
                    states: states.len(),
                });
            }
        }
        let mut first = 0;
        for m in machines.machines.iter_mut() {
            let count = m.count.max(0) as usize;
            m.offset = to_i32(layout.state + first * state_width, "state table offset")?;
            m.size = to_i32(count * state_width, "state table size")?;
            first += count;
        }

        let mut header = template.header.clone();
        header.state_table_count = to_i32(machines.machines.len(), "state table count")?;
        header.state_width = to_i32(state_width, "row width")?;
        header.state_count = to_i32(states.len(), "state count")?;
        header.condition_width = to_i32(ConditionRow::width(), "row width")?;
        header.condition_count = to_i32(conditions.len(), "condition count")?;
        header.command_width = to_i32(CommandRow::width(), "row width")?;
        header.command_count = to_i32(commands.len(), "command count")?;
        header.arg_width = to_i32(ArgRow::width(), "row width")?;
        header.arg_count = to_i32(args.len(), "argument count")?;
        header.condition_ptr_offset = to_i32(layout.condition_ptr, "condition pointer offset")?;
        header.condition_ptr_count = to_i32(condition_ptrs.len(), "condition pointer count")?;
        header.data_size = to_i32(layout.tail + template.tail.len(), "data size")?;

        // Names living in the tail move with it.
        let shift = layout.tail as i64 - template.old_tail_offset as i64;
        for name in header.names.iter_mut() {
            if name.offset >= 0 && name.offset as usize >= template.old_tail_offset {
                name.offset = i32::try_from(name.offset as i64 + shift)
                    .map_err(|_| EncodeError::Overflow { what: "name offset" })?;
            }
        }

        log::debug!(
            "packed {} states, {} conditions ({} shared), {} commands, {} args, blob {} bytes",
            states.len(),
            conditions.len(),
            self.shared,
            commands.len(),
            args.len(),
            self.blob.len()
        );

        Ok(RawTables {
            header,
            machines,
            states: raw_table(&states, layout.state),
            conditions: raw_table(&conditions, layout.condition),
            commands: raw_table(&commands, layout.command),
            args: raw_table(&args, layout.arg),
            condition_ptrs: raw_table(&condition_ptrs, layout.condition_ptr),
            layout,
            blob: self.blob,
            tail: template.tail.to_vec(),
        })
    }
}

/// Pack `states` in order into a fresh set of tables.
pub fn pack(states: &[State], template: &PackTemplate<'_>) -> EncodeResult<RawTables> {
    let mut packer = Repacker::new();
    for state in states {
        packer.pack_state(state);
    }
    packer.finish(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ExprDecoder, OpcodeTable, RegisterFile};
    use crate::graph::Expression;
    use crate::header::{AuxRange, StateMachineEntry, MACHINE_PREFIX_FIELDS};
    use crate::tables::typed_rows;
    use pretty_assertions::assert_eq;

    fn expr(raw: &[u8]) -> Expression {
        let table = OpcodeTable::extended();
        Expression::decode(raw.to_vec(), &ExprDecoder::new(&table), &mut RegisterFile::new())
    }

    fn cond(next_state: Option<i32>, raw: &[u8]) -> Condition {
        Condition {
            next_state,
            expression: expr(raw),
            commands: vec![],
            subconditions: vec![],
        }
    }

    fn state(index: i32, conditions: Vec<Condition>) -> State {
        State {
            index,
            conditions,
            enter_commands: vec![],
            exit_commands: vec![],
            unknown_commands: vec![],
        }
    }

    fn template_parts(machines: Vec<StateMachineEntry>) -> (EsdHeader, StateMachineHeader) {
        let header = EsdHeader {
            magic: 0x4C53_5366,
            version: [1, 1, 1],
            table_size: 0x54,
            data_size: 0,
            unk: [6, 0x2C, 1, 0x10],
            state_table_count: machines.len() as i32,
            state_width: 36,
            state_count: 0,
            condition_width: 28,
            condition_count: 0,
            command_width: 16,
            command_count: 0,
            arg_width: 8,
            arg_count: 0,
            condition_ptr_offset: 0,
            condition_ptr_count: 0,
            names: [AuxRange { offset: 500, size: 4 }, AuxRange::default(), AuxRange::default()],
        };
        let machines = StateMachineHeader {
            prefix: [0; MACHINE_PREFIX_FIELDS],
            machines,
        };
        (header, machines)
    }

    fn one_machine() -> Vec<StateMachineEntry> {
        vec![StateMachineEntry::default()]
    }

    fn run_pack(states: &[State], machines: Vec<StateMachineEntry>) -> EncodeResult<RawTables> {
        let (header, machines) = template_parts(machines);
        let tail = [1u8, 0, 0, 0];
        pack(
            states,
            &PackTemplate {
                header: &header,
                machines: &machines,
                tail: &tail,
                old_tail_offset: 500,
            },
        )
    }

    #[test]
    fn identical_conditions_share_a_row() {
        let shared = cond(Some(1), &[0x41, 0xA1]);
        let states = vec![
            state(0, vec![shared.clone(), cond(None, &[0x40, 0xA1])]),
            state(1, vec![shared]),
        ];
        let tables = run_pack(&states, one_machine()).unwrap();
        assert_eq!(tables.header.condition_count, 2);
        assert_eq!(tables.header.condition_ptr_count, 3);

        let ptrs: Vec<ConditionPtrRow> = typed_rows(&tables.condition_ptrs).unwrap();
        assert_eq!(ptrs[0], ptrs[2]);
    }

    #[test]
    fn different_targets_are_not_shared() {
        let states = vec![
            state(0, vec![cond(Some(1), &[0x41, 0xA1])]),
            state(1, vec![cond(Some(0), &[0x41, 0xA1])]),
        ];
        let tables = run_pack(&states, one_machine()).unwrap();
        assert_eq!(tables.header.condition_count, 2);
    }

    #[test]
    fn next_state_points_at_state_row() {
        let states = vec![state(7, vec![cond(Some(9), &[0x41, 0xA1])]), state(9, vec![])];
        let tables = run_pack(&states, one_machine()).unwrap();
        let rows: Vec<ConditionRow> = typed_rows(&tables.conditions).unwrap();
        assert_eq!(rows[0].next_state, (tables.layout.state + 36) as i32);

        let st: Vec<StateRow> = typed_rows(&tables.states).unwrap();
        assert_eq!(st[1].conditions, Span::EMPTY);
        assert_eq!(st[1].enter, Span::EMPTY);
    }

    #[test]
    fn unresolved_next_state_is_an_error() {
        let states = vec![state(0, vec![cond(Some(42), &[0x41, 0xA1])])];
        assert_eq!(
            run_pack(&states, one_machine()).unwrap_err(),
            EncodeError::UnresolvedState { index: 42 }
        );
    }

    #[test]
    fn duplicate_target_index_is_ambiguous() {
        let states = vec![
            state(10, vec![cond(Some(10), &[0x41, 0xA1])]),
            state(10, vec![]),
        ];
        assert_eq!(
            run_pack(&states, one_machine()).unwrap_err(),
            EncodeError::AmbiguousState { index: 10 }
        );
    }

    #[test]
    fn unreferenced_duplicate_index_still_packs() {
        let states = vec![
            state(3, vec![cond(Some(5), &[0x41, 0xA1])]),
            state(3, vec![]),
            state(5, vec![]),
        ];
        let tables = run_pack(&states, one_machine()).unwrap();
        let rows: Vec<ConditionRow> = typed_rows(&tables.conditions).unwrap();
        assert_eq!(rows[0].next_state, (tables.layout.state + 2 * 36) as i32);
    }

    #[test]
    fn header_counts_and_tail_shift() {
        let states = vec![state(0, vec![cond(None, &[0x41, 0xA1])])];
        let tables = run_pack(&states, one_machine()).unwrap();
        let l = tables.layout;
        assert_eq!(tables.header.condition_ptr_offset as usize, l.condition_ptr);
        assert_eq!(tables.header.data_size as usize, l.tail + 4);
        assert_eq!(tables.header.names[0].offset as usize, l.tail);
        assert_eq!(tables.machines.machines[0].count, 1);
        assert_eq!(tables.machines.machines[0].offset as usize, l.state);
        assert_eq!(tables.to_bytes().unwrap().len(), 108 + l.tail + 4);
    }

    #[test]
    fn two_machines_must_partition_states() {
        let machines = vec![
            StateMachineEntry { id: 0, offset: 0, size: 0, count: 1 },
            StateMachineEntry { id: 1, offset: 0, size: 0, count: 2 },
        ];
        let states = vec![state(0, vec![]), state(1, vec![])];
        assert_eq!(
            run_pack(&states, machines.clone()).unwrap_err(),
            EncodeError::StateMachinePartition { covered: 3, states: 2 }
        );

        let states = vec![state(0, vec![]), state(1, vec![]), state(2, vec![])];
        let tables = run_pack(&states, machines).unwrap();
        assert_eq!(tables.machines.machines[1].offset as usize, tables.layout.state + 36);
        assert_eq!(tables.machines.machines[1].size, 72);
    }
}
