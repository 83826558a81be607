use std::collections::VecDeque;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::board::{
    self, Money, SpaceId, SpaceKind, BOARD_SIZE, JAIL_FINE, MAX_JAIL_TURNS, MAX_PLAYERS,
    MAX_WIN_THRESHOLD, MIN_PLAYERS, MIN_WIN_THRESHOLD, TAX_AMOUNT,
};
use super::cards;
use super::state::{
    DeckKind, GameEvent, GamePhase, GameState, IntegrityError, JailRelease, Outcome, Player,
    PlayerId, TurnStage, DEFAULT_PLAYER_COLORS, DEFAULT_PLAYER_NAMES,
};

const MAX_NAME_LEN: usize = 24;

/// Dice and deck randomness behind one seam so tests and replays can
/// script every roll and keep the decks in table order.
pub trait DiceSource {
    fn roll(&mut self) -> (u8, u8);
    fn shuffle(&mut self, indices: &mut [usize]);
}

pub struct RandomDice {
    rng: SmallRng,
}

impl RandomDice {
    pub fn from_entropy() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl DiceSource for RandomDice {
    fn roll(&mut self) -> (u8, u8) {
        (self.rng.gen_range(1..=6), self.rng.gen_range(1..=6))
    }

    fn shuffle(&mut self, indices: &mut [usize]) {
        indices.shuffle(&mut self.rng);
    }
}

/// Queued rolls for tests. Shuffles are identity, so decks stay in
/// declaration order.
pub struct ScriptedDice {
    queue: VecDeque<(u8, u8)>,
}

impl ScriptedDice {
    pub fn new(rolls: &[(u8, u8)]) -> Self {
        Self {
            queue: rolls.iter().copied().collect(),
        }
    }

    pub fn push(&mut self, roll: (u8, u8)) {
        self.queue.push_back(roll);
    }
}

impl DiceSource for ScriptedDice {
    fn roll(&mut self) -> (u8, u8) {
        self.queue.pop_front().unwrap_or((1, 2))
    }

    fn shuffle(&mut self, _indices: &mut [usize]) {}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RuleError {
    GameFinished,
    NotStarted,
    SetupOnly,
    WrongStage {
        expected: TurnStage,
        actual: TurnStage,
    },
    InsufficientFunds {
        required: Money,
        available: Money,
    },
    AlreadyOwned {
        space_id: SpaceId,
    },
    NotOwnedByCurrentPlayer {
        space_id: SpaceId,
    },
    NotImprovable {
        space_id: SpaceId,
    },
    PlayerCountOutOfRange {
        requested: usize,
    },
    ThresholdOutOfRange {
        requested: Money,
    },
    PlayerNotFound {
        player_id: PlayerId,
    },
    NameRejected,
    IntegrityViolation {
        detail: IntegrityError,
    },
}

/// Snapshot bundle handed to the facade after a successful command.
#[derive(Debug, Clone, Serialize)]
pub struct RuleResolution {
    pub state: GameState,
    pub events: Vec<GameEvent>,
    pub outcome: Option<Outcome>,
}

impl RuleResolution {
    pub fn new(state: &GameState, events: Vec<GameEvent>) -> Self {
        Self {
            state: state.clone(),
            events,
            outcome: state.outcome,
        }
    }
}

fn emit(state: &mut GameState, events: &mut Vec<GameEvent>, event: GameEvent) {
    state.record_event(event.clone());
    events.push(event);
}

/// What a landing left behind for the caller to sequence.
#[derive(Debug, Clone, Copy, Default)]
struct Landing {
    decision_pending: bool,
    extra_roll: bool,
}

/// The command surface. Every command validates phase and stage before
/// touching the state; an illegal command returns a `RuleError` and
/// leaves the state exactly as it was.
pub struct TurnEngine {
    dice: Box<dyn DiceSource>,
}

impl TurnEngine {
    pub fn new() -> Self {
        Self::with_dice(Box::new(RandomDice::from_entropy()))
    }

    pub fn with_dice(dice: Box<dyn DiceSource>) -> Self {
        Self { dice }
    }

    fn ensure_playing(&self, state: &GameState) -> Result<(), RuleError> {
        match state.phase {
            GamePhase::Setup => Err(RuleError::NotStarted),
            GamePhase::GameOver => Err(RuleError::GameFinished),
            GamePhase::Playing => Ok(()),
        }
    }

    fn ensure_setup(&self, state: &GameState) -> Result<(), RuleError> {
        if state.phase == GamePhase::Setup {
            Ok(())
        } else {
            Err(RuleError::SetupOnly)
        }
    }

    fn ensure_stage(&self, state: &GameState, expected: TurnStage) -> Result<(), RuleError> {
        if state.stage == expected {
            Ok(())
        } else {
            Err(RuleError::WrongStage {
                expected,
                actual: state.stage,
            })
        }
    }

    fn check_integrity(&self, state: &GameState) -> Result<(), RuleError> {
        state
            .integrity_check()
            .map_err(|detail| RuleError::IntegrityViolation { detail })
    }

    pub fn set_player_count(
        &mut self,
        state: &mut GameState,
        count: usize,
    ) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_setup(state)?;
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&count) {
            return Err(RuleError::PlayerCountOutOfRange { requested: count });
        }
        state.selected_player_count = count;
        Ok(Vec::new())
    }

    pub fn set_win_threshold(
        &mut self,
        state: &mut GameState,
        threshold: Money,
    ) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_setup(state)?;
        if !(MIN_WIN_THRESHOLD..=MAX_WIN_THRESHOLD).contains(&threshold) {
            return Err(RuleError::ThresholdOutOfRange {
                requested: threshold,
            });
        }
        state.win_threshold = threshold;
        Ok(Vec::new())
    }

    pub fn set_player_name(
        &mut self,
        state: &mut GameState,
        seat: usize,
        name: &str,
    ) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_setup(state)?;
        if seat >= MAX_PLAYERS {
            return Err(RuleError::PlayerNotFound {
                player_id: seat as PlayerId,
            });
        }
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
            return Err(RuleError::NameRejected);
        }
        // Snapshots may carry a short or empty override list.
        if state.name_overrides.len() < MAX_PLAYERS {
            state.name_overrides.resize(MAX_PLAYERS, None);
        }
        state.name_overrides[seat] = Some(trimmed.to_string());
        Ok(Vec::new())
    }

    /// Locks the roster, shuffles both decks and opens the first turn.
    pub fn start_game(&mut self, state: &mut GameState) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_setup(state)?;
        // A loaded snapshot can hold a count the setter never accepted.
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&state.selected_player_count) {
            return Err(RuleError::PlayerCountOutOfRange {
                requested: state.selected_player_count,
            });
        }
        let overrides = state.name_overrides.clone();
        state.players = (0..state.selected_player_count)
            .map(|seat| {
                let name = overrides
                    .get(seat)
                    .and_then(|name| name.clone())
                    .unwrap_or_else(|| DEFAULT_PLAYER_NAMES[seat].to_string());
                Player::new(seat as PlayerId, name, DEFAULT_PLAYER_COLORS[seat])
            })
            .collect();

        let mut community: Vec<usize> = (0..cards::community_cards().len()).collect();
        self.dice.shuffle(&mut community);
        let mut destiny: Vec<usize> = (0..cards::destiny_cards().len()).collect();
        self.dice.shuffle(&mut destiny);
        state.community_order = community;
        state.community_cursor = 0;
        state.destiny_order = destiny;
        state.destiny_cursor = 0;

        state.phase = GamePhase::Playing;
        state.current_player = 0;
        state.stage = TurnStage::AwaitingRoll;
        state.last_dice = [0, 0];

        let mut events = Vec::new();
        emit(
            state,
            &mut events,
            GameEvent::GameStarted {
                player_count: state.players.len(),
                win_threshold: state.win_threshold,
            },
        );
        emit(state, &mut events, GameEvent::TurnStarted { player_id: 0 });
        self.check_integrity(state)?;
        Ok(events)
    }

    /// Drops everything and returns to setup defaults. Legal in any phase.
    pub fn new_game(&mut self, state: &mut GameState) -> Result<Vec<GameEvent>, RuleError> {
        *state = GameState::default();
        Ok(Vec::new())
    }

    pub fn roll_dice(&mut self, state: &mut GameState) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_playing(state)?;
        self.ensure_stage(state, TurnStage::AwaitingRoll)?;

        let suppressed = state.doubles_suppressed;
        state.doubles_suppressed = false;
        state.force_end_turn = false;

        let (d1, d2) = self.dice.roll();
        let doubles = d1 == d2;
        state.last_dice = [d1, d2];
        let player_id = state.current().id;

        let mut events = Vec::new();
        emit(
            state,
            &mut events,
            GameEvent::DiceRolled {
                player_id,
                dice: [d1, d2],
            },
        );

        // Jail is settled before any movement.
        let mut jail_suppress = false;
        if state.current().in_jail {
            if state.current().get_out_of_jail_cards > 0 {
                let player = state.current_mut();
                player.get_out_of_jail_cards -= 1;
                player.leave_jail();
                emit(
                    state,
                    &mut events,
                    GameEvent::ReleasedFromJail {
                        player_id,
                        method: JailRelease::CardUsed,
                    },
                );
            } else if doubles {
                state.current_mut().leave_jail();
                jail_suppress = true;
                emit(
                    state,
                    &mut events,
                    GameEvent::ReleasedFromJail {
                        player_id,
                        method: JailRelease::Doubles,
                    },
                );
            } else {
                let attempts = (state.current().jail_turns + 1).min(MAX_JAIL_TURNS);
                state.current_mut().jail_turns = attempts;
                if attempts >= MAX_JAIL_TURNS && state.current_mut().pay(JAIL_FINE) {
                    emit(
                        state,
                        &mut events,
                        GameEvent::JailFinePaid {
                            player_id,
                            amount: JAIL_FINE,
                        },
                    );
                    state.current_mut().leave_jail();
                    emit(
                        state,
                        &mut events,
                        GameEvent::ReleasedFromJail {
                            player_id,
                            method: JailRelease::FinePaid,
                        },
                    );
                } else {
                    emit(
                        state,
                        &mut events,
                        GameEvent::StayedInJail {
                            player_id,
                            jail_turns: attempts,
                        },
                    );
                    state.stage = TurnStage::AwaitingEndTurn;
                    return Ok(events);
                }
            }
        }

        let landing = self.move_and_land(state, &mut events, (d1 + d2) as usize);

        events.extend(state.check_game_end());
        if state.is_finished() {
            return Ok(events);
        }
        if state.current().bankrupt {
            state.force_end_turn = false;
            state.reroll_pending = false;
            self.advance_turn(state, &mut events);
            self.check_integrity(state)?;
            return Ok(events);
        }

        // An earned reroll is consumed by end_turn, which hands the same
        // player back to the roll stage instead of advancing.
        let reroll = landing.extra_roll
            || (doubles
                && !suppressed
                && !jail_suppress
                && !state.force_end_turn
                && !state.current().in_jail);
        if reroll {
            state.reroll_pending = true;
            if !landing.extra_roll {
                emit(
                    state,
                    &mut events,
                    GameEvent::DoublesRerollGranted { player_id },
                );
            }
        }
        if !landing.decision_pending {
            state.stage = TurnStage::AwaitingEndTurn;
        }
        state.force_end_turn = false;
        self.check_integrity(state)?;
        Ok(events)
    }

    fn move_and_land(
        &mut self,
        state: &mut GameState,
        events: &mut Vec<GameEvent>,
        steps: usize,
    ) -> Landing {
        let player_id = state.current().id;
        let from = state.current().position;
        let to = (from + steps) % BOARD_SIZE;
        let wrapped = from + steps >= BOARD_SIZE;
        state.current_mut().position = to;
        emit(state, events, GameEvent::Moved { player_id, from, to });
        if wrapped {
            let amount = state.current_mut().collect_salary();
            emit(
                state,
                events,
                GameEvent::SalaryCollected { player_id, amount },
            );
        }
        self.resolve_landing(state, events)
    }

    fn resolve_landing(&mut self, state: &mut GameState, events: &mut Vec<GameEvent>) -> Landing {
        let player_id = state.current().id;
        let space = board::space(state.current().position);
        let mut landing = Landing::default();
        match space.kind {
            SpaceKind::Start | SpaceKind::FreeParking => {}
            SpaceKind::Property | SpaceKind::Railroad | SpaceKind::Utility => {
                match state.owner_of(space.id) {
                    None => {
                        // The offer only goes up when the player can pay.
                        if state.current().money >= space.price {
                            state.stage = TurnStage::AwaitingPurchaseDecision;
                            landing.decision_pending = true;
                            emit(
                                state,
                                events,
                                GameEvent::PurchaseOffered {
                                    player_id,
                                    space_id: space.id,
                                    price: space.price,
                                },
                            );
                        }
                    }
                    Some(owner_id) if owner_id == player_id => {}
                    Some(owner_id) => {
                        let rent = state.players[owner_id as usize].rent_for(space);
                        if state.current_mut().pay(rent) {
                            state.players[owner_id as usize].receive(rent);
                            emit(
                                state,
                                events,
                                GameEvent::RentPaid {
                                    player_id,
                                    owner_id,
                                    space_id: space.id,
                                    amount: rent,
                                },
                            );
                        } else {
                            // Short on rent: hand over what cash remains,
                            // then go under. Titles return to the bank.
                            let amount = state.current().money.max(0);
                            state.current_mut().money -= amount;
                            state.players[owner_id as usize].receive(amount);
                            emit(
                                state,
                                events,
                                GameEvent::RentPaid {
                                    player_id,
                                    owner_id,
                                    space_id: space.id,
                                    amount,
                                },
                            );
                            events.extend(state.declare_bankrupt(player_id));
                        }
                    }
                }
            }
            SpaceKind::Tax => {
                if state.current_mut().pay(TAX_AMOUNT) {
                    emit(
                        state,
                        events,
                        GameEvent::TaxPaid {
                            player_id,
                            amount: TAX_AMOUNT,
                        },
                    );
                } else {
                    let amount = state.current().money.max(0);
                    state.current_mut().money -= amount;
                    emit(state, events, GameEvent::TaxPaid { player_id, amount });
                    events.extend(state.declare_bankrupt(player_id));
                }
            }
            SpaceKind::GoToJail => {
                state.current_mut().go_to_jail();
                emit(state, events, GameEvent::SentToJail { player_id });
                state.force_end_turn = true;
            }
            SpaceKind::Jail => {
                state.stage = TurnStage::AwaitingJailChoice;
                landing.decision_pending = true;
                emit(state, events, GameEvent::JailChoiceRequired { player_id });
            }
            SpaceKind::CommunityChest => {
                let card = state.draw_community();
                emit(
                    state,
                    events,
                    GameEvent::CardDrawn {
                        player_id,
                        deck: DeckKind::Community,
                        card_id: card.id,
                        title: card.title.to_string(),
                    },
                );
                let (card_events, outcome) = card.action.apply(state, player_id);
                events.extend(card_events);
                if outcome.forced_end {
                    state.force_end_turn = true;
                }
            }
            SpaceKind::Chance | SpaceKind::Destiny => {
                let card = state.draw_destiny();
                emit(
                    state,
                    events,
                    GameEvent::CardDrawn {
                        player_id,
                        deck: DeckKind::Destiny,
                        card_id: card.id,
                        title: card.title.to_string(),
                    },
                );
                let (card_events, outcome) = card.action.apply(state, player_id);
                events.extend(card_events);
                if outcome.extra_roll {
                    // The granted roll never stacks with the doubles rule.
                    landing.extra_roll = true;
                    state.doubles_suppressed = true;
                } else {
                    // Fate decides the turn is over, doubles or not.
                    state.force_end_turn = true;
                }
            }
            SpaceKind::Negotiation => {
                let candidates = state.negotiation_candidates(player_id);
                emit(
                    state,
                    events,
                    GameEvent::NegotiationOpportunity {
                        player_id,
                        candidates,
                    },
                );
            }
        }
        landing
    }

    pub fn buy_current_space(&mut self, state: &mut GameState) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_playing(state)?;
        self.ensure_stage(state, TurnStage::AwaitingPurchaseDecision)?;
        let space = board::space(state.current().position);
        if state.owner_of(space.id).is_some() {
            return Err(RuleError::AlreadyOwned { space_id: space.id });
        }
        let player_id = state.current().id;
        let monopolies_before = state.current().monopolies.len();
        let available = state.current().money;
        if !state.current_mut().acquire(space) {
            return Err(RuleError::InsufficientFunds {
                required: space.price,
                available,
            });
        }
        let mut events = Vec::new();
        emit(
            state,
            &mut events,
            GameEvent::SpacePurchased {
                player_id,
                space_id: space.id,
                price: space.price,
            },
        );
        if state.current().monopolies.len() > monopolies_before {
            if let Some(group) = space.group {
                emit(
                    state,
                    &mut events,
                    GameEvent::MonopolyFormed { player_id, group },
                );
            }
        }
        self.finish_decision(state);
        self.check_integrity(state)?;
        Ok(events)
    }

    pub fn skip_purchase(&mut self, state: &mut GameState) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_playing(state)?;
        self.ensure_stage(state, TurnStage::AwaitingPurchaseDecision)?;
        let player_id = state.current().id;
        let space_id = state.current().position;
        let mut events = Vec::new();
        emit(
            state,
            &mut events,
            GameEvent::PurchaseDeclined {
                player_id,
                space_id,
            },
        );
        self.finish_decision(state);
        Ok(events)
    }

    /// Jail-landing choice: pay the fine and stay free. A player who
    /// cannot cover the fine takes the jail term instead.
    pub fn pay_jail_fine(&mut self, state: &mut GameState) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_playing(state)?;
        self.ensure_stage(state, TurnStage::AwaitingJailChoice)?;
        let player_id = state.current().id;
        let mut events = Vec::new();
        if state.current_mut().pay(JAIL_FINE) {
            emit(
                state,
                &mut events,
                GameEvent::JailFinePaid {
                    player_id,
                    amount: JAIL_FINE,
                },
            );
            self.finish_decision(state);
        } else {
            state.current_mut().go_to_jail();
            emit(state, &mut events, GameEvent::JailAccepted { player_id });
            state.reroll_pending = false;
            state.stage = TurnStage::AwaitingEndTurn;
        }
        Ok(events)
    }

    pub fn accept_jail_term(&mut self, state: &mut GameState) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_playing(state)?;
        self.ensure_stage(state, TurnStage::AwaitingJailChoice)?;
        let player_id = state.current().id;
        state.current_mut().go_to_jail();
        let mut events = Vec::new();
        emit(state, &mut events, GameEvent::JailAccepted { player_id });
        state.reroll_pending = false;
        state.stage = TurnStage::AwaitingEndTurn;
        Ok(events)
    }

    /// Builds one improvement tier on an owned monopoly property. Legal
    /// only while no purchase or jail decision is pending.
    pub fn improve_property(
        &mut self,
        state: &mut GameState,
        space_id: SpaceId,
    ) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_playing(state)?;
        if !matches!(
            state.stage,
            TurnStage::AwaitingRoll | TurnStage::AwaitingEndTurn
        ) {
            return Err(RuleError::WrongStage {
                expected: TurnStage::AwaitingEndTurn,
                actual: state.stage,
            });
        }
        if space_id >= BOARD_SIZE {
            return Err(RuleError::NotImprovable { space_id });
        }
        let space = board::space(space_id);
        let player_id = state.current().id;
        if !state.current().properties.contains(&space_id) {
            return Err(RuleError::NotOwnedByCurrentPlayer { space_id });
        }
        if !state.current().can_improve(space) {
            return Err(RuleError::NotImprovable { space_id });
        }
        let cost = Player::improvement_cost(space);
        let available = state.current().money;
        if !state.current_mut().improve(space) {
            return Err(RuleError::InsufficientFunds {
                required: cost,
                available,
            });
        }
        let level = state.current().improvement_level(space_id);
        let mut events = Vec::new();
        emit(
            state,
            &mut events,
            GameEvent::PropertyImproved {
                player_id,
                space_id,
                level,
                cost,
            },
        );
        self.check_integrity(state)?;
        Ok(events)
    }

    pub fn end_turn(&mut self, state: &mut GameState) -> Result<Vec<GameEvent>, RuleError> {
        self.ensure_playing(state)?;
        self.ensure_stage(state, TurnStage::AwaitingEndTurn)?;
        let mut events = state.check_game_end();
        if state.is_finished() {
            return Ok(events);
        }
        state.force_end_turn = false;
        if state.reroll_pending && !state.current().bankrupt {
            state.reroll_pending = false;
            state.stage = TurnStage::AwaitingRoll;
            self.check_integrity(state)?;
            return Ok(events);
        }
        state.doubles_suppressed = false;
        state.reroll_pending = false;
        self.advance_turn(state, &mut events);
        self.check_integrity(state)?;
        Ok(events)
    }

    /// A resolved decision always parks at the end-turn gate; any earned
    /// reroll is picked up there.
    fn finish_decision(&self, state: &mut GameState) {
        state.stage = TurnStage::AwaitingEndTurn;
    }

    /// Hands the turn to the next active player, burning any pending
    /// turn-loss flags along the way.
    fn advance_turn(&self, state: &mut GameState, events: &mut Vec<GameEvent>) {
        let prev = state.current().id;
        let mut next = state.next_active_index(state.current_player);
        while state.players[next].skip_next_turn {
            state.players[next].skip_next_turn = false;
            let skipped = state.players[next].id;
            emit(state, events, GameEvent::TurnSkipped { player_id: skipped });
            next = state.next_active_index(next);
        }
        state.current_player = next;
        state.stage = TurnStage::AwaitingRoll;
        let next_player = state.players[next].id;
        emit(
            state,
            events,
            GameEvent::TurnEnded {
                player_id: prev,
                next_player,
            },
        );
    }
}

impl Default for TurnEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::{
        DEFAULT_WIN_THRESHOLD, JAIL_INDEX, PASS_START_SALARY, STARTING_MONEY,
    };
    use crate::game::state::WinReason;

    fn engine(rolls: &[(u8, u8)]) -> TurnEngine {
        TurnEngine::with_dice(Box::new(ScriptedDice::new(rolls)))
    }

    fn started(players: usize, rolls: &[(u8, u8)]) -> (TurnEngine, GameState) {
        let mut engine = engine(rolls);
        let mut state = GameState::default();
        engine.set_player_count(&mut state, players).unwrap();
        engine.start_game(&mut state).unwrap();
        (engine, state)
    }

    #[test]
    fn setup_commands_validate_their_input() {
        let mut engine = engine(&[]);
        let mut state = GameState::default();
        assert!(matches!(
            engine.set_player_count(&mut state, 1),
            Err(RuleError::PlayerCountOutOfRange { requested: 1 })
        ));
        assert!(matches!(
            engine.set_player_count(&mut state, 6),
            Err(RuleError::PlayerCountOutOfRange { .. })
        ));
        assert!(matches!(
            engine.set_win_threshold(&mut state, 999_999),
            Err(RuleError::ThresholdOutOfRange { .. })
        ));
        assert!(matches!(
            engine.set_player_name(&mut state, 0, "   "),
            Err(RuleError::NameRejected)
        ));
        assert!(matches!(
            engine.set_player_name(&mut state, 0, "nombre demasiado largo para la mesa"),
            Err(RuleError::NameRejected)
        ));
        assert!(matches!(
            engine.set_player_name(&mut state, 7, "Che"),
            Err(RuleError::PlayerNotFound { player_id: 7 })
        ));
        engine.set_player_count(&mut state, 3).unwrap();
        engine.set_win_threshold(&mut state, 2_000_000).unwrap();
        engine.set_player_name(&mut state, 0, "Tano").unwrap();
        engine.start_game(&mut state).unwrap();
        assert!(matches!(
            engine.set_player_count(&mut state, 2),
            Err(RuleError::SetupOnly)
        ));
        assert!(matches!(
            engine.set_win_threshold(&mut state, 2_000_000),
            Err(RuleError::SetupOnly)
        ));
    }

    #[test]
    fn start_game_builds_the_roster() {
        let mut engine = engine(&[]);
        let mut state = GameState::default();
        engine.set_player_count(&mut state, 3).unwrap();
        engine.set_player_name(&mut state, 1, "  Mecha  ").unwrap();
        let events = engine.start_game(&mut state).unwrap();
        assert_eq!(state.phase, GamePhase::Playing);
        assert_eq!(state.stage, TurnStage::AwaitingRoll);
        assert_eq!(state.players.len(), 3);
        assert_eq!(state.players[0].name, "Rojo");
        assert_eq!(state.players[1].name, "Mecha");
        assert_eq!(state.players[2].name, "Verde");
        assert!(state
            .players
            .iter()
            .all(|p| p.money == STARTING_MONEY && p.position == 0));
        assert_eq!(state.community_order.len(), cards::community_cards().len());
        assert!(matches!(
            events[0],
            GameEvent::GameStarted {
                player_count: 3,
                win_threshold: DEFAULT_WIN_THRESHOLD
            }
        ));
    }

    #[test]
    fn setup_tolerates_snapshots_missing_override_slots() {
        let mut engine = engine(&[]);
        let mut state = GameState::default();
        state.name_overrides.clear();
        engine.set_player_name(&mut state, 3, "Tano").unwrap();
        assert_eq!(state.name_overrides[3].as_deref(), Some("Tano"));

        state.name_overrides.clear();
        engine.set_player_count(&mut state, 2).unwrap();
        engine.start_game(&mut state).unwrap();
        assert_eq!(state.players[0].name, "Rojo");
    }

    #[test]
    fn start_game_rejects_an_out_of_range_roster() {
        let mut engine = engine(&[]);
        let mut state = GameState::default();
        state.selected_player_count = 9;
        assert!(matches!(
            engine.start_game(&mut state),
            Err(RuleError::PlayerCountOutOfRange { requested: 9 })
        ));
        assert_eq!(state.phase, GamePhase::Setup);
    }

    #[test]
    fn commands_refuse_to_run_before_start() {
        let mut engine = engine(&[]);
        let mut state = GameState::default();
        assert!(matches!(
            engine.roll_dice(&mut state),
            Err(RuleError::NotStarted)
        ));
        assert!(matches!(
            engine.end_turn(&mut state),
            Err(RuleError::NotStarted)
        ));
    }

    #[test]
    fn roll_offers_affordable_unowned_space() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        let events = engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].position, 3);
        assert_eq!(state.stage, TurnStage::AwaitingPurchaseDecision);
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::PurchaseOffered {
                space_id: 3,
                price: 80_000,
                ..
            }
        )));

        let events = engine.buy_current_space(&mut state).unwrap();
        assert!(state.players[0].properties.contains(&3));
        assert_eq!(state.players[0].money, STARTING_MONEY - 80_000);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::SpacePurchased { space_id: 3, .. })));

        engine.end_turn(&mut state).unwrap();
        assert_eq!(state.current_player, 1);
        assert_eq!(state.stage, TurnStage::AwaitingRoll);
    }

    #[test]
    fn no_offer_when_player_cannot_afford() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].money = 10_000;
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
        assert!(!state
            .event_log
            .iter()
            .any(|e| matches!(e, GameEvent::PurchaseOffered { .. })));
    }

    #[test]
    fn wrong_stage_commands_leave_no_trace() {
        let (mut engine, mut state) = started(2, &[]);
        let before = state.clone();
        assert!(matches!(
            engine.end_turn(&mut state),
            Err(RuleError::WrongStage {
                expected: TurnStage::AwaitingEndTurn,
                actual: TurnStage::AwaitingRoll,
            })
        ));
        assert!(matches!(
            engine.buy_current_space(&mut state),
            Err(RuleError::WrongStage { .. })
        ));
        assert!(matches!(
            engine.accept_jail_term(&mut state),
            Err(RuleError::WrongStage { .. })
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn doubles_keep_the_same_player_through_end_turn() {
        let (mut engine, mut state) = started(2, &[(2, 2), (1, 2)]);
        let events = engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].position, 4);
        assert_eq!(state.stage, TurnStage::AwaitingPurchaseDecision);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::DoublesRerollGranted { player_id: 0 })));

        engine.skip_purchase(&mut state).unwrap();
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);

        engine.end_turn(&mut state).unwrap();
        assert_eq!(state.current_player, 0, "doubles keep the turn");
        assert_eq!(state.stage, TurnStage::AwaitingRoll);

        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].position, 7);
        assert_eq!(state.stage, TurnStage::AwaitingJailChoice);
    }

    #[test]
    fn salary_paid_exactly_once_per_wrap() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].position = 26;
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].position, 1);
        let salaries = state
            .event_log
            .iter()
            .filter(|e| matches!(e, GameEvent::SalaryCollected { .. }))
            .count();
        assert_eq!(salaries, 1);
    }

    #[test]
    fn go_to_jail_space_teleports_without_salary() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].position = 18;
        engine.roll_dice(&mut state).unwrap();
        let player = &state.players[0];
        assert_eq!(player.position, JAIL_INDEX);
        assert!(player.in_jail);
        assert_eq!(player.money, STARTING_MONEY);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn go_to_jail_overrides_doubles() {
        let (mut engine, mut state) = started(2, &[(2, 2)]);
        state.players[0].position = 17;
        engine.roll_dice(&mut state).unwrap();
        assert!(state.players[0].in_jail);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
        assert!(!state
            .event_log
            .iter()
            .any(|e| matches!(e, GameEvent::DoublesRerollGranted { .. })));
    }

    #[test]
    fn jailed_player_stays_without_doubles() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].go_to_jail();
        engine.roll_dice(&mut state).unwrap();
        let player = &state.players[0];
        assert!(player.in_jail);
        assert_eq!(player.jail_turns, 1);
        assert_eq!(player.position, JAIL_INDEX);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn jail_doubles_release_moves_but_never_rerolls() {
        let (mut engine, mut state) = started(2, &[(3, 3)]);
        state.players[0].go_to_jail();
        engine.roll_dice(&mut state).unwrap();
        let player = &state.players[0];
        assert!(!player.in_jail);
        assert_eq!(player.position, 13);
        assert_eq!(player.money, STARTING_MONEY - TAX_AMOUNT);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
        assert!(!state
            .event_log
            .iter()
            .any(|e| matches!(e, GameEvent::DoublesRerollGranted { .. })));
    }

    #[test]
    fn jail_card_is_auto_redeemed() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].go_to_jail();
        state.players[0].get_out_of_jail_cards = 1;
        engine.roll_dice(&mut state).unwrap();
        let player = &state.players[0];
        assert!(!player.in_jail);
        assert_eq!(player.get_out_of_jail_cards, 0);
        assert!(state.event_log.iter().any(|e| matches!(
            e,
            GameEvent::ReleasedFromJail {
                method: JailRelease::CardUsed,
                ..
            }
        )));
    }

    #[test]
    fn third_attempt_forces_the_fine_and_moves() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].go_to_jail();
        state.players[0].jail_turns = 2;
        state.players[0].money = 800_000;
        engine.roll_dice(&mut state).unwrap();
        let player = &state.players[0];
        assert!(!player.in_jail);
        // Fine paid, then moved 3 from the jail space to Destino, whose
        // first card teleports to the start and pays the salary.
        assert_eq!(player.position, 0);
        assert_eq!(player.money, 800_000 - JAIL_FINE + PASS_START_SALARY);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn third_attempt_without_funds_stays_put() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].go_to_jail();
        state.players[0].jail_turns = 2;
        state.players[0].money = 100_000;
        engine.roll_dice(&mut state).unwrap();
        let player = &state.players[0];
        assert!(player.in_jail);
        assert_eq!(player.position, JAIL_INDEX);
        assert_eq!(player.money, 100_000);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn jail_landing_offers_the_choice() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].position = 4;
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.stage, TurnStage::AwaitingJailChoice);

        engine.pay_jail_fine(&mut state).unwrap();
        let player = &state.players[0];
        assert!(!player.in_jail);
        assert_eq!(player.money, STARTING_MONEY - JAIL_FINE);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn jail_landing_accept_takes_the_term() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].position = 4;
        engine.roll_dice(&mut state).unwrap();
        engine.accept_jail_term(&mut state).unwrap();
        let player = &state.players[0];
        assert!(player.in_jail);
        assert_eq!(player.jail_turns, 0);
        assert_eq!(player.money, STARTING_MONEY);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn jail_fine_falls_back_to_the_term_when_broke() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].position = 4;
        state.players[0].money = 100_000;
        engine.roll_dice(&mut state).unwrap();
        engine.pay_jail_fine(&mut state).unwrap();
        let player = &state.players[0];
        assert!(player.in_jail);
        assert_eq!(player.money, 100_000);
    }

    #[test]
    fn rent_flows_to_the_owner() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        assert!(state.players[1].acquire(board::space(3)));
        let owner_cash = state.players[1].money;
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].money, STARTING_MONEY - 4_000);
        assert_eq!(state.players[1].money, owner_cash + 4_000);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
        assert!(state.event_log.iter().any(|e| matches!(
            e,
            GameEvent::RentPaid {
                player_id: 0,
                owner_id: 1,
                space_id: 3,
                amount: 4_000,
            }
        )));
    }

    #[test]
    fn landing_on_own_space_is_a_no_op() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        assert!(state.players[0].acquire(board::space(3)));
        let cash = state.players[0].money;
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].money, cash);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn unpayable_rent_bankrupts_and_ends_the_game_at_two_players() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        assert!(state.players[1].acquire(board::space(3)));
        state.players[0].money = 1_000;
        let owner_cash = state.players[1].money;
        engine.roll_dice(&mut state).unwrap();
        assert!(state.players[0].bankrupt);
        assert_eq!(state.players[1].money, owner_cash + 1_000);
        assert_eq!(
            state.outcome,
            Some(Outcome {
                winner: 1,
                reason: WinReason::LastStanding
            })
        );
        assert!(state.is_finished());
    }

    #[test]
    fn bankrupt_mid_turn_hands_play_onward_with_three_players() {
        let (mut engine, mut state) = started(3, &[(1, 2)]);
        assert!(state.players[1].acquire(board::space(3)));
        state.players[0].money = 1_000;
        engine.roll_dice(&mut state).unwrap();
        assert!(state.players[0].bankrupt);
        assert!(!state.is_finished());
        assert_eq!(state.current_player, 1);
        assert_eq!(state.stage, TurnStage::AwaitingRoll);
    }

    #[test]
    fn wealth_goal_ends_the_game() {
        let mut engine = engine(&[(1, 2)]);
        let mut state = GameState::default();
        engine.set_player_count(&mut state, 2).unwrap();
        engine.set_win_threshold(&mut state, 1_000_000).unwrap();
        engine.start_game(&mut state).unwrap();
        state.players[0].money = 900_000;
        state.players[0].position = 26;
        engine.roll_dice(&mut state).unwrap();
        assert!(state.is_finished());
        assert_eq!(
            state.outcome,
            Some(Outcome {
                winner: 0,
                reason: WinReason::Wealth
            })
        );
    }

    #[test]
    fn tax_space_collects_the_flat_amount() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.players[0].position = 10;
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].money, STARTING_MONEY - TAX_AMOUNT);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn unpayable_tax_escalates_to_bankruptcy() {
        let (mut engine, mut state) = started(3, &[(1, 2)]);
        state.players[0].position = 10;
        state.players[0].money = 40_000;
        engine.roll_dice(&mut state).unwrap();
        assert!(state.players[0].bankrupt);
        assert_eq!(state.players[0].money, 0);
        assert!(!state.is_finished());
        assert_eq!(state.current_player, 1);
    }

    #[test]
    fn destiny_card_forces_the_end_despite_doubles() {
        // Doubles land on Destino; the first destiny card teleports to
        // the start, and fate overrides the reroll.
        let (mut engine, mut state) = started(2, &[(1, 1)]);
        state.players[0].position = 8;
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].position, 0);
        assert_eq!(state.players[0].money, STARTING_MONEY + PASS_START_SALARY);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
        assert!(!state
            .event_log
            .iter()
            .any(|e| matches!(e, GameEvent::DoublesRerollGranted { .. })));
        engine.end_turn(&mut state).unwrap();
        assert_eq!(state.current_player, 1, "fate overrides the doubles");
    }

    #[test]
    fn community_card_does_not_force_the_end() {
        let (mut engine, mut state) = started(2, &[(1, 1)]);
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].position, 2);
        assert_eq!(state.players[0].money, STARTING_MONEY + 100_000);
        assert!(state
            .event_log
            .iter()
            .any(|e| matches!(e, GameEvent::DoublesRerollGranted { .. })));

        engine.end_turn(&mut state).unwrap();
        assert_eq!(state.current_player, 0, "doubles survive a community card");
        assert_eq!(state.stage, TurnStage::AwaitingRoll);
    }

    #[test]
    fn extra_roll_card_suppresses_doubles_stacking() {
        let (mut engine, mut state) = started(2, &[(1, 1), (2, 2)]);
        state.destiny_cursor = 9;
        state.players[0].position = 8;
        engine.roll_dice(&mut state).unwrap();
        assert!(state.doubles_suppressed);
        assert!(state
            .event_log
            .iter()
            .any(|e| matches!(e, GameEvent::ExtraRollGranted { player_id: 0 })));

        engine.end_turn(&mut state).unwrap();
        assert_eq!(state.current_player, 0);
        assert_eq!(state.stage, TurnStage::AwaitingRoll);

        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.players[0].position, 14);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);

        engine.end_turn(&mut state).unwrap();
        assert_eq!(state.current_player, 1, "granted doubles do not stack");
    }

    #[test]
    fn lose_turn_card_skips_the_whole_next_turn() {
        let (mut engine, mut state) = started(2, &[(1, 2), (5, 6), (1, 2)]);
        state.destiny_cursor = 10;
        state.players[0].position = 7;
        engine.roll_dice(&mut state).unwrap();
        assert!(state.players[0].skip_next_turn);
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
        engine.end_turn(&mut state).unwrap();
        assert_eq!(state.current_player, 1);

        engine.roll_dice(&mut state).unwrap();
        engine.skip_purchase(&mut state).unwrap();
        engine.end_turn(&mut state).unwrap();
        assert_eq!(state.current_player, 1, "seat 0 was skipped");
        assert!(!state.players[0].skip_next_turn);
        assert!(state
            .event_log
            .iter()
            .any(|e| matches!(e, GameEvent::TurnSkipped { player_id: 0 })));
    }

    #[test]
    fn negotiation_space_reports_candidates() {
        let (mut engine, mut state) = started(3, &[(1, 2)]);
        assert!(state.players[1].acquire(board::space(3)));
        state.players[0].position = 22;
        engine.roll_dice(&mut state).unwrap();
        assert!(state.event_log.iter().any(|e| matches!(
            e,
            GameEvent::NegotiationOpportunity { player_id: 0, candidates } if candidates == &[1]
        )));
        assert_eq!(state.stage, TurnStage::AwaitingEndTurn);
    }

    #[test]
    fn improve_property_is_gated_by_stage_and_ownership() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        for id in [1, 3, 4] {
            assert!(state.players[0].acquire(board::space(id)));
        }
        let events = engine.improve_property(&mut state, 1).unwrap();
        assert!(matches!(
            events[0],
            GameEvent::PropertyImproved {
                space_id: 1,
                level: 1,
                cost: 30_000,
                ..
            }
        ));

        assert!(matches!(
            engine.improve_property(&mut state, 8),
            Err(RuleError::NotOwnedByCurrentPlayer { space_id: 8 })
        ));

        assert!(state.players[0].acquire(board::space(5)));
        assert!(matches!(
            engine.improve_property(&mut state, 5),
            Err(RuleError::NotOwnedByCurrentPlayer { space_id: 5 })
        ));

        state.players[0].money = 1_000;
        assert!(matches!(
            engine.improve_property(&mut state, 1),
            Err(RuleError::InsufficientFunds {
                required: 30_000,
                available: 1_000,
            })
        ));

        state.players[0].money = STARTING_MONEY;
        state.players[0].position = 12;
        engine.roll_dice(&mut state).unwrap();
        assert_eq!(state.stage, TurnStage::AwaitingPurchaseDecision);
        assert!(matches!(
            engine.improve_property(&mut state, 1),
            Err(RuleError::WrongStage { .. })
        ));
    }

    #[test]
    fn end_turn_applies_the_cash_floor() {
        let (mut engine, mut state) = started(3, &[(1, 2)]);
        state.players[0].position = 10;
        engine.roll_dice(&mut state).unwrap();
        state.players[0].money = state.bankruptcy_threshold - 1;
        engine.end_turn(&mut state).unwrap();
        assert!(state.players[0].bankrupt);
        assert!(!state.is_finished());
        assert_eq!(state.current_player, 1);
    }

    #[test]
    fn commands_after_game_over_are_refused() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        state.declare_bankrupt(1);
        assert!(state.is_finished());
        assert!(matches!(
            engine.roll_dice(&mut state),
            Err(RuleError::GameFinished)
        ));
        assert!(matches!(
            engine.end_turn(&mut state),
            Err(RuleError::GameFinished)
        ));
    }

    #[test]
    fn new_game_resets_everything() {
        let (mut engine, mut state) = started(2, &[(1, 2)]);
        engine.roll_dice(&mut state).unwrap();
        engine.new_game(&mut state).unwrap();
        assert_eq!(state, GameState::default());
    }

    #[test]
    fn deck_draws_cycle_without_consuming() {
        let (_, mut state) = started(2, &[]);
        let len = state.destiny_order.len();
        let first = state.draw_destiny().id;
        for _ in 1..len {
            state.draw_destiny();
        }
        assert_eq!(state.draw_destiny().id, first, "deck wraps around");
    }
}
