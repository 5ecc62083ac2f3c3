use log::{debug, warn};

use super::{
    context_view_state::ContextViewState,
    error::EstablishmentError,
    establish_task::{ContextEstablishTask, EstablishState, EstablishTaskResult},
};

/// Outcome of one `ContextEstablisher::step`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EstablishStep {
    /// A task of the current state is waiting
    Wait,
    /// Every task of the previous state completed and the establisher moved on
    Advanced(ContextViewState),
    /// Already in game, nothing left to run
    InGame,
    /// A task failed; the pass is over until `reset`
    Failed(EstablishmentError),
}

/// Runs the ordered task lists of each `ContextViewState` for one channel, or
/// for the whole context.
pub struct ContextEstablisher {
    state: ContextViewState,
    tasks: Vec<Vec<Box<dyn ContextEstablishTask>>>,
    next_task: usize,
    // (state index, task index) in completion order
    completed: Vec<(usize, usize)>,
    history: Vec<ContextViewState>,
    failure: Option<EstablishmentError>,
}

impl ContextEstablisher {
    pub fn new() -> Self {
        Self {
            state: ContextViewState::Initial,
            tasks: Self::empty_tasks(),
            next_task: 0,
            completed: Vec::new(),
            history: vec![ContextViewState::Initial],
            failure: None,
        }
    }

    pub fn add_task(&mut self, state: ContextViewState, task: Box<dyn ContextEstablishTask>) {
        if state < self.state || (state == self.state && self.state == ContextViewState::InGame) {
            warn!(
                "Establishment task '{}' added for state {} but establisher is already in {}, it will never run",
                task.name(),
                state,
                self.state
            );
        }
        self.tasks[state.index()].push(task);
    }

    pub fn state(&self) -> ContextViewState {
        self.state
    }

    pub fn is_in_game(&self) -> bool {
        self.state == ContextViewState::InGame
    }

    pub fn failure(&self) -> Option<&EstablishmentError> {
        self.failure.as_ref()
    }

    /// Every state entered since the last reset, in order
    pub fn history(&self) -> &[ContextViewState] {
        &self.history
    }

    pub fn task_count(&self, state: ContextViewState) -> usize {
        self.tasks[state.index()].len()
    }

    /// Runs the tasks of the current state until one waits or fails. When all
    /// of them completed, advances by exactly one state. `SpawnEntities` is
    /// not left while `state.pending_spawns` is non-zero.
    pub fn step(&mut self, state: &mut EstablishState) -> EstablishStep {
        if let Some(failure) = &self.failure {
            return EstablishStep::Failed(failure.clone());
        }
        if self.state == ContextViewState::InGame {
            return EstablishStep::InGame;
        }

        state.view_state = self.state;
        let state_index = self.state.index();

        while self.next_task < self.tasks[state_index].len() {
            let task = &mut self.tasks[state_index][self.next_task];
            match task.on_step(state) {
                EstablishTaskResult::Ok => {
                    debug!("Establishment task '{}' completed in {}", task.name(), self.state);
                    self.completed.push((state_index, self.next_task));
                    self.next_task += 1;
                }
                EstablishTaskResult::Wait => {
                    return EstablishStep::Wait;
                }
                EstablishTaskResult::Failed { cause, reason } => {
                    let failure = EstablishmentError::TaskFailed {
                        task: task.name().to_string(),
                        state: self.state.name(),
                        cause,
                        reason,
                    };
                    warn!("{}", failure);
                    self.fail_loading();
                    self.failure = Some(failure.clone());
                    return EstablishStep::Failed(failure);
                }
            }
        }

        if self.state == ContextViewState::SpawnEntities && state.pending_spawns > 0 {
            return EstablishStep::Wait;
        }

        let Some(next) = self.state.next() else {
            return EstablishStep::InGame;
        };
        self.state = next;
        self.next_task = 0;
        self.history.push(next);
        state.view_state = next;
        EstablishStep::Advanced(next)
    }

    /// Back to `Initial` with no tasks; the caller repopulates them
    pub fn reset(&mut self) {
        self.state = ContextViewState::Initial;
        self.tasks = Self::empty_tasks();
        self.next_task = 0;
        self.completed.clear();
        self.history = vec![ContextViewState::Initial];
        self.failure = None;
    }

    // completed tasks are told in reverse completion order
    fn fail_loading(&mut self) {
        let completed = std::mem::take(&mut self.completed);
        for (state_index, task_index) in completed.into_iter().rev() {
            let task = &mut self.tasks[state_index][task_index];
            task.on_fail_loading();
        }
    }

    fn empty_tasks() -> Vec<Vec<Box<dyn ContextEstablishTask>>> {
        ContextViewState::ALL.iter().map(|_| Vec::new()).collect()
    }
}

impl Default for ContextEstablisher {
    fn default() -> Self {
        Self::new()
    }
}
