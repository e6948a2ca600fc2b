//! Per-attribute load coordination.
//!
//! Each entity has one [`LoadCoordinator`] for `src` and one for `anim`. Every
//! started load captures the coordinator's generation in a [`LoadTicket`]; a
//! completed load is applied only while its ticket is still the latest one, so
//! the last request always wins and older results are discarded when they land.
//! Progress of a superseded load is dropped the same way.

use std::{cell::Cell, fmt, rc::Rc};

use crate::{context::ProgressReporter, model::EntityId, resources::ProgressFn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoadAttribute {
    Src,
    Anim,
}

impl LoadAttribute {
    pub fn name(&self) -> &'static str {
        match self {
            LoadAttribute::Src => "src",
            LoadAttribute::Anim => "anim",
        }
    }
}

impl fmt::Display for LoadAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one started load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    pub entity: EntityId,
    pub attribute: LoadAttribute,
    pub generation: u64,
    pub locator: String,
}

/// What a locator change asks the scene to do.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadRequest {
    /// Empty locator: drop whatever the attribute produced.
    Clear,
    /// Not attached to the scene yet; the load starts on connect.
    Defer,
    Start(LoadTicket),
}

pub struct LoadCoordinator {
    attribute: LoadAttribute,
    locator: String,
    generation: Rc<Cell<u64>>,
    in_flight: Option<u64>,
    progress: Rc<dyn ProgressReporter>,
}

impl LoadCoordinator {
    pub fn new(attribute: LoadAttribute, progress: Rc<dyn ProgressReporter>) -> Self {
        Self {
            attribute,
            locator: String::new(),
            generation: Rc::new(Cell::new(0)),
            in_flight: None,
            progress,
        }
    }

    pub fn attribute(&self) -> LoadAttribute {
        self.attribute
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn progress(&self) -> &Rc<dyn ProgressReporter> {
        &self.progress
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Records a new locator. Any load still in flight becomes stale.
    pub fn set(&mut self, entity: EntityId, locator: &str, connected: bool) -> LoadRequest {
        self.locator = locator.trim().to_string();
        self.invalidate();
        if self.locator.is_empty() {
            LoadRequest::Clear
        } else if !connected {
            LoadRequest::Defer
        } else {
            LoadRequest::Start(self.begin(entity))
        }
    }

    /// Starts a load of the current locator, if there is one.
    pub fn begin(&mut self, entity: EntityId) -> LoadTicket {
        let generation = self.bump();
        self.in_flight = Some(generation);
        self.progress.start(self.attribute.name(), &self.locator);
        LoadTicket {
            entity,
            attribute: self.attribute,
            generation,
            locator: self.locator.clone(),
        }
    }

    /// Progress callback for the load behind `ticket`. Silent once the ticket is stale.
    pub fn progress_fn(&self, ticket: &LoadTicket) -> ProgressFn {
        let progress = self.progress.clone();
        let current = self.generation.clone();
        let generation = ticket.generation;
        Box::new(move |loaded, total| {
            if total > 0 && current.get() == generation {
                progress.set_progress(loaded as f32 / total as f32);
            }
        })
    }

    /// Makes every outstanding ticket stale.
    pub fn invalidate(&mut self) {
        self.bump();
        if self.in_flight.take().is_some() {
            self.progress.abort_if_loading();
        }
    }

    fn bump(&mut self) -> u64 {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        generation
    }

    pub fn accepts(&self, ticket: &LoadTicket) -> bool {
        ticket.attribute == self.attribute && self.in_flight == Some(ticket.generation)
    }

    /// Consumes the latest ticket. Returns false for stale ones.
    pub fn complete(&mut self, ticket: &LoadTicket) -> bool {
        if !self.accepts(ticket) {
            return false;
        }
        self.in_flight = None;
        true
    }
}

impl fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("attribute", &self.attribute)
            .field("locator", &self.locator)
            .field("generation", &self.generation.get())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
