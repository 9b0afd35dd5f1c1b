//! A decoded ESD file: the state graph plus everything needed to write it back.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{DecodeResult, EncodeResult};
use crate::graph::{self, BuildOptions, CommandList, Condition, Expression, State};
use crate::header::{
    AuxRange, EsdHeader, StateMachineEntry, StateMachineHeader, MACHINE_PREFIX_FIELDS,
};
use crate::pack::{self, PackTemplate};
use crate::tables::RawTables;

const NAME_SLOTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct EsdScript {
    pub header: EsdHeader,
    pub machines: StateMachineHeader,
    pub states: Vec<State>,
    /// Bytes after the packed expressions, carried through unchanged.
    pub tail: Vec<u8>,
    tail_offset: usize,
    names: Vec<Option<String>>,
}

#[derive(Serialize)]
struct Export<'a> {
    names: &'a [Option<String>],
    states: &'a [State],
}

fn collect_targets(conditions: &[Condition], out: &mut Vec<i32>) {
    for c in conditions {
        if let Some(next) = c.next_state {
            if !out.contains(&next) {
                out.push(next);
            }
        }
        collect_targets(&c.subconditions, out);
    }
}

impl EsdScript {
    /// An empty single-machine script, for building graphs from scratch.
    pub fn new(states: Vec<State>) -> Self {
        let header = EsdHeader {
            magic: u32::from_le_bytes(*b"fSSL"),
            version: [1, 1, 1],
            table_size: 0x54,
            data_size: 0,
            unk: [6, 0x2C, 1, 0x10],
            state_table_count: 1,
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
            names: [AuxRange { offset: -1, size: 0 }; NAME_SLOTS],
        };
        Self {
            header,
            machines: StateMachineHeader {
                prefix: [0; MACHINE_PREFIX_FIELDS],
                machines: vec![StateMachineEntry::default()],
            },
            states,
            tail: Vec::new(),
            tail_offset: 0,
            names: vec![None; NAME_SLOTS],
        }
    }

    pub fn parse(bytes: &[u8], options: &BuildOptions) -> DecodeResult<Self> {
        let tables = RawTables::parse(bytes)?;
        Self::from_tables(&tables, options)
    }

    pub fn from_tables(tables: &RawTables, options: &BuildOptions) -> DecodeResult<Self> {
        let states = graph::build(tables, options)?;
        let names = (0..NAME_SLOTS)
            .map(|slot| tables.aux_name(slot))
            .collect::<DecodeResult<Vec<_>>>()?;

        log::info!("decoded {} states", states.len());

        Ok(Self {
            header: tables.header.clone(),
            machines: tables.machines.clone(),
            states,
            tail: tables.tail.clone(),
            tail_offset: tables.layout.tail,
            names,
        })
    }

    pub fn to_tables(&self) -> EncodeResult<RawTables> {
        pack::pack(
            &self.states,
            &PackTemplate {
                header: &self.header,
                machines: &self.machines,
                tail: &self.tail,
                old_tail_offset: self.tail_offset,
            },
        )
    }

    pub fn to_bytes(&self) -> EncodeResult<Vec<u8>> {
        self.to_tables()?.to_bytes()
    }

    /// Auxiliary names found in the file tail, one per header slot.
    pub fn names(&self) -> &[Option<String>] {
        &self.names
    }

    /// State id -> position in [`EsdScript::states`]. The first occurrence wins.
    pub fn index_map(&self) -> HashMap<i32, usize> {
        let mut map = HashMap::with_capacity(self.states.len());
        for (pos, s) in self.states.iter().enumerate() {
            map.entry(s.index).or_insert(pos);
        }
        map
    }

    pub fn state(&self, index: i32) -> Option<&State> {
        self.states.iter().find(|s| s.index == index)
    }

    /// Distinct target states reachable in one transition, in condition order.
    pub fn successors(&self, index: i32) -> Vec<i32> {
        let mut out = Vec::new();
        if let Some(state) = self.state(index) {
            collect_targets(&state.conditions, &mut out);
        }
        out
    }

    pub fn command_arg_mut(
        &mut self,
        state_pos: usize,
        list: CommandList,
        command: usize,
        arg: usize,
    ) -> Option<&mut Expression> {
        self.states
            .get_mut(state_pos)?
            .commands_mut(list)
            .get_mut(command)?
            .args
            .get_mut(arg)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&Export {
            names: &self.names,
            states: &self.states,
        })
    }
}
