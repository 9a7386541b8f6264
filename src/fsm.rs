//! Generic finite-state-machine engine.
//!
//! A machine owns one handler per state, stored at the index of its state id,
//! plus a context the enter/exit hooks actuate through (a power path, a
//! power-source selector...). Domain machines wrap a [`StateMachine`] and add
//! their own data handlers on top of [`StateMachine::dispatch`].

use core::fmt::Debug;
use tracing::{debug, info};

/// Identity of a state. Ids whose `index()` is `COUNT` or more are invalid.
pub trait StateId: Copy + Eq + Debug {
    const COUNT: usize;

    fn index(self) -> usize;

    fn name(self) -> &'static str;
}

/// One state of a machine.
pub trait MachineState {
    type Id: StateId;
    type Context;

    fn id(&self) -> Self::Id;

    /// Runs once each time the state becomes current.
    fn on_enter(&mut self, ctx: &mut Self::Context);

    /// Runs once each time the state stops being current.
    fn on_exit(&mut self, ctx: &mut Self::Context);
}

/// Hook and transition counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionStats<const N: usize> {
    pub enters: [u32; N],
    pub exits: [u32; N],
    pub transitions: u32,
    pub rejected: u32,
}

impl<const N: usize> Default for TransitionStats<N> {
    fn default() -> Self {
        Self {
            enters: [0; N],
            exits: [0; N],
            transitions: 0,
            rejected: 0,
        }
    }
}

pub struct StateMachine<S: MachineState, const N: usize> {
    label: &'static str,
    states: [S; N],
    current: usize,
    ctx: S::Context,
    stats: TransitionStats<N>,
}

impl<S: MachineState, const N: usize> StateMachine<S, N> {
    /// Builds the machine in `starting`. With `enter_starting` the starting
    /// state's enter hook runs now (cold boot); without it the state is
    /// assumed to be already in effect (restore).
    ///
    /// Halts if the state table is inconsistent with the id type.
    pub fn new(
        label: &'static str,
        states: [S; N],
        starting: S::Id,
        enter_starting: bool,
        ctx: S::Context,
    ) -> Self {
        crate::halt_unless!(
            N == S::Id::COUNT,
            "{} state table holds {} states, expected {}",
            label,
            N,
            S::Id::COUNT
        );
        for (slot, state) in states.iter().enumerate() {
            crate::halt_unless!(
                state.id().index() == slot,
                "{} state slot {} holds {:?}",
                label,
                slot,
                state.id()
            );
        }
        crate::halt_unless!(
            starting.index() < N,
            "{} cannot start in invalid state {:?}",
            label,
            starting
        );

        let mut machine = Self {
            label,
            states,
            current: starting.index(),
            ctx,
            stats: TransitionStats::default(),
        };

        if enter_starting {
            machine.states[machine.current].on_enter(&mut machine.ctx);
            machine.stats.enters[machine.current] = machine.stats.enters[machine.current].wrapping_add(1);
        }

        info!(
            "{} state machine started in [ {} ]",
            machine.label,
            machine.current_state().name()
        );
        machine
    }

    pub fn current_state(&self) -> S::Id {
        self.states[self.current].id()
    }

    pub fn state(&self, id: S::Id) -> Option<&S> {
        self.states.get(id.index())
    }

    pub fn context(&self) -> &S::Context {
        &self.ctx
    }

    /// Mutable access to a state's data while it is not necessarily current.
    pub fn state_mut(&mut self, id: S::Id) -> Option<&mut S> {
        self.states.get_mut(id.index())
    }

    pub fn stats(&self) -> &TransitionStats<N> {
        &self.stats
    }

    /// Moves to `next` and returns the state after the call.
    ///
    /// Transitioning into the current state does nothing; an invalid id is
    /// rejected. Otherwise the current state's exit hook completes before the
    /// next state's enter hook starts.
    pub fn transition_state(&mut self, next: S::Id) -> S::Id {
        let previous = self.current_state();
        if next == previous {
            return previous;
        }

        let next_index = next.index();
        if next_index >= N {
            self.stats.rejected = self.stats.rejected.wrapping_add(1);
            debug!("{} rejected transition to invalid state {:?}", self.label, next);
            return previous;
        }

        self.states[self.current].on_exit(&mut self.ctx);
        self.stats.exits[self.current] = self.stats.exits[self.current].wrapping_add(1);

        self.current = next_index;

        self.states[self.current].on_enter(&mut self.ctx);
        self.stats.enters[self.current] = self.stats.enters[self.current].wrapping_add(1);
        self.stats.transitions = self.stats.transitions.wrapping_add(1);

        info!(
            "{} STATE TRANSITION [ {} ] --> [ {} ]",
            self.label,
            previous.name(),
            self.current_state().name()
        );
        self.current_state()
    }

    /// Runs `handler` against the current state and transitions to the state
    /// it returns.
    pub fn dispatch<F>(&mut self, handler: F) -> S::Id
    where
        F: FnOnce(&mut S, &mut S::Context) -> S::Id,
    {
        let next = handler(&mut self.states[self.current], &mut self.ctx);
        self.transition_state(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Amber,
        None,
    }

    impl StateId for Light {
        const COUNT: usize = 3;

        fn index(self) -> usize {
            self as usize
        }

        fn name(self) -> &'static str {
            match self {
                Light::Red => "Red",
                Light::Green => "Green",
                Light::Amber => "Amber",
                Light::None => "None",
            }
        }
    }

    struct Lamp(Light);

    impl MachineState for Lamp {
        type Id = Light;
        type Context = Vec<(&'static str, Light)>;

        fn id(&self) -> Light {
            self.0
        }

        fn on_enter(&mut self, log: &mut Self::Context) {
            log.push(("enter", self.0));
        }

        fn on_exit(&mut self, log: &mut Self::Context) {
            log.push(("exit", self.0));
        }
    }

    fn lamps() -> [Lamp; 3] {
        [Lamp(Light::Red), Lamp(Light::Green), Lamp(Light::Amber)]
    }

    #[test]
    fn test_cold_boot_runs_enter_and_restore_does_not() {
        let cold = StateMachine::new("Lamp", lamps(), Light::Green, true, Vec::new());
        assert_eq!(cold.context(), &vec![("enter", Light::Green)]);

        let warm = StateMachine::new("Lamp", lamps(), Light::Green, false, Vec::new());
        assert!(warm.context().is_empty());
        assert_eq!(warm.current_state(), Light::Green);
    }

    #[test]
    fn test_exit_completes_before_enter() {
        let mut sm = StateMachine::new("Lamp", lamps(), Light::Red, false, Vec::new());
        assert_eq!(sm.transition_state(Light::Green), Light::Green);
        assert_eq!(
            sm.context(),
            &vec![("exit", Light::Red), ("enter", Light::Green)]
        );
    }

    #[test]
    fn test_self_transition_runs_no_hooks() {
        let mut sm = StateMachine::new("Lamp", lamps(), Light::Amber, false, Vec::new());
        assert_eq!(sm.transition_state(Light::Amber), Light::Amber);
        assert!(sm.context().is_empty());
        assert_eq!(sm.stats().transitions, 0);
    }

    #[test]
    fn test_invalid_state_is_rejected() {
        let mut sm = StateMachine::new("Lamp", lamps(), Light::Red, false, Vec::new());
        assert_eq!(sm.transition_state(Light::None), Light::Red);
        assert_eq!(sm.current_state(), Light::Red);
        assert!(sm.context().is_empty());
        assert_eq!(sm.stats().rejected, 1);
    }

    #[test]
    fn test_counters_wrap_instead_of_overflowing() {
        let mut sm = StateMachine::new("Lamp", lamps(), Light::Red, false, Vec::new());
        sm.stats.rejected = u32::MAX;
        sm.stats.transitions = u32::MAX;
        sm.stats.enters[Light::Green.index()] = u32::MAX;

        sm.transition_state(Light::None);
        sm.transition_state(Light::Green);

        assert_eq!(sm.stats().rejected, 0);
        assert_eq!(sm.stats().transitions, 0);
        assert_eq!(sm.stats().enters[Light::Green.index()], 0);
        assert_eq!(sm.stats().exits[Light::Red.index()], 1);
    }

    #[test]
    fn test_hook_counts_match_state_changes() {
        let mut sm = StateMachine::new("Lamp", lamps(), Light::Red, true, Vec::new());
        let sequence = [
            Light::Green,
            Light::Green,
            Light::Amber,
            Light::None,
            Light::Red,
            Light::Red,
            Light::Green,
        ];

        let mut expected_enters = [1u32, 0, 0];
        let mut expected_exits = [0u32; 3];
        let mut current = Light::Red;
        for next in sequence {
            sm.transition_state(next);
            if next != current && next.index() < Light::COUNT {
                expected_exits[current.index()] += 1;
                expected_enters[next.index()] += 1;
                current = next;
            }
        }

        assert_eq!(sm.current_state(), current);
        assert_eq!(sm.stats().enters, expected_enters);
        assert_eq!(sm.stats().exits, expected_exits);
    }

    #[test]
    fn test_dispatch_transitions_to_the_returned_state() {
        let mut sm = StateMachine::new("Lamp", lamps(), Light::Red, false, Vec::new());
        let after = sm.dispatch(|lamp, _| match lamp.id() {
            Light::Red => Light::Green,
            other => other,
        });
        assert_eq!(after, Light::Green);
    }

    #[test]
    #[should_panic(expected = "state slot 1 holds Amber")]
    fn test_mismatched_state_table_halts() {
        let table = [Lamp(Light::Red), Lamp(Light::Amber), Lamp(Light::Green)];
        let _ = StateMachine::new("Lamp", table, Light::Red, false, Vec::new());
    }
}
