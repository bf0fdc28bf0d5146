//! Stream descriptor registry.
//!
//! Holds the stream-wide demux state, the programs announced by the
//! stream and the elementary stream descriptors keyed by their identifier
//! (the PID for transport streams). The registry is generic over the demux
//! state attached to the stream (`S`) and to each elementary stream (`E`).

use std::collections::BTreeMap;

use crate::error::{InputError, Result};

/// An elementary stream descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct EsDescriptor<E> {
    /// Stream identifier
    pub id: u16,
    /// Program the stream belongs to, `None` for program-independent streams
    pub program: Option<u16>,
    /// Demux-specific state
    pub demux_data: E,
}

/// A program and the elementary streams it carries
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramDescriptor {
    pub number: u16,
    /// Version of the last program map applied, if any
    pub version: Option<u8>,
    pub es_ids: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct StreamRegistry<S, E> {
    demux_data: Option<S>,
    programs: BTreeMap<u16, ProgramDescriptor>,
    es: BTreeMap<u16, EsDescriptor<E>>,
}

impl<S, E> Default for StreamRegistry<S, E> {
    fn default() -> Self {
        Self {
            demux_data: None,
            programs: BTreeMap::new(),
            es: BTreeMap::new(),
        }
    }
}

impl<S, E> StreamRegistry<S, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the registry and attaches fresh stream-wide demux state.
    pub fn init_stream(&mut self, demux_data: S) {
        self.programs.clear();
        self.es.clear();
        self.demux_data = Some(demux_data);
    }

    pub fn is_initialized(&self) -> bool {
        self.demux_data.is_some()
    }

    pub fn demux_data(&self) -> Option<&S> {
        self.demux_data.as_ref()
    }

    pub fn demux_data_mut(&mut self) -> Option<&mut S> {
        self.demux_data.as_mut()
    }

    /// Drops everything, including the stream-wide state.
    pub fn clear(&mut self) {
        self.demux_data = None;
        self.programs.clear();
        self.es.clear();
    }

    pub fn add_program(&mut self, number: u16) -> &mut ProgramDescriptor {
        self.programs.entry(number).or_insert_with(|| ProgramDescriptor {
            number,
            version: None,
            es_ids: Vec::new(),
        })
    }

    pub fn find_program(&self, number: u16) -> Option<&ProgramDescriptor> {
        self.programs.get(&number)
    }

    pub fn find_program_mut(&mut self, number: u16) -> Option<&mut ProgramDescriptor> {
        self.programs.get_mut(&number)
    }

    /// Removes a program together with its elementary streams.
    pub fn remove_program(&mut self, number: u16) -> Option<ProgramDescriptor> {
        let program = self.programs.remove(&number)?;
        for id in &program.es_ids {
            self.es.remove(id);
        }
        Some(program)
    }

    pub fn programs(&self) -> impl Iterator<Item = &ProgramDescriptor> {
        self.programs.values()
    }

    /// Registers an elementary stream. The identifier must be unused and the
    /// program, when given, must already exist.
    pub fn add_es(&mut self, program: Option<u16>, id: u16, demux_data: E) -> Result<&mut EsDescriptor<E>> {
        if self.es.contains_key(&id) {
            return Err(InputError::InvalidData(format!(
                "elementary stream 0x{id:04x} already registered"
            )));
        }
        if let Some(number) = program {
            let descriptor = self.programs.get_mut(&number).ok_or_else(|| {
                InputError::InvalidData(format!("unknown program {number}"))
            })?;
            descriptor.es_ids.push(id);
        }

        Ok(self.es.entry(id).or_insert(EsDescriptor {
            id,
            program,
            demux_data,
        }))
    }

    pub fn find_es(&self, id: u16) -> Option<&EsDescriptor<E>> {
        self.es.get(&id)
    }

    pub fn find_es_mut(&mut self, id: u16) -> Option<&mut EsDescriptor<E>> {
        self.es.get_mut(&id)
    }

    /// Removes an elementary stream and unlinks it from its program.
    pub fn remove_es(&mut self, id: u16) -> Option<EsDescriptor<E>> {
        let es = self.es.remove(&id)?;
        if let Some(program) = es.program.and_then(|n| self.programs.get_mut(&n)) {
            program.es_ids.retain(|e| *e != id);
        }
        Some(es)
    }

    pub fn es(&self) -> impl Iterator<Item = &EsDescriptor<E>> {
        self.es.values()
    }

    pub fn es_count(&self) -> usize {
        self.es.len()
    }
}
