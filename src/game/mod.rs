//! Core game logic: rule tables, card decks, state machine and turn engine.

pub mod board;
pub mod cards;
pub mod rules;
pub mod state;

pub use board::{Group, Money, Space, SpaceId, SpaceKind, BOARD, BOARD_SIZE, JAIL_INDEX};
pub use cards::{Card, CardAction, CardOutcome};
pub use rules::{
    DiceSource, RandomDice, RuleError, RuleResolution, ScriptedDice, TurnEngine,
};
pub use state::{
    DeckKind, GameEvent, GamePhase, GameState, IntegrityError, JailRelease, Outcome, Player,
    PlayerId, TurnStage, WinReason,
};
