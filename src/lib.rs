pub mod game;

use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

pub use game::{
    Card, CardAction, DeckKind, DiceSource, GameEvent, GamePhase, GameState, Group,
    IntegrityError, JailRelease, Money, Outcome, Player, PlayerId, RandomDice, RuleError,
    RuleResolution, ScriptedDice, Space, SpaceId, SpaceKind, TurnEngine, TurnStage, WinReason,
};

#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
}

fn to_js_error(error: RuleError) -> JsValue {
    to_value(&error).unwrap_or_else(|serialize_err| JsValue::from_str(&serialize_err.to_string()))
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn make_resolution_json(resolution: RuleResolution) -> Result<String, JsValue> {
    serde_json::to_string(&resolution).map_err(serde_to_js_error)
}

/// Mirrors the event log lines to the browser console.
fn log_events(state: &GameState, events: &[GameEvent]) {
    for event in events {
        web_sys::console::log_1(&event.describe(state).into());
    }
}

/// The facade the presentation layer talks to: one game state plus the
/// engine that mutates it. Every command returns the full resolution
/// (snapshot, events, outcome) as JSON.
#[wasm_bindgen]
pub struct GameEngine {
    state: GameState,
    engine: TurnEngine,
}

#[wasm_bindgen]
impl GameEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(initial_state_json: Option<String>) -> Result<GameEngine, JsValue> {
        let state = if let Some(json) = initial_state_json {
            serde_json::from_str(&json).map_err(serde_to_js_error)?
        } else {
            GameState::default()
        };
        Ok(GameEngine {
            state,
            engine: TurnEngine::new(),
        })
    }

    /// Reproducible games for replays and debugging.
    #[wasm_bindgen(js_name = "withSeed")]
    pub fn with_seed(seed: u64) -> GameEngine {
        GameEngine {
            state: GameState::default(),
            engine: TurnEngine::with_dice(Box::new(RandomDice::seeded(seed))),
        }
    }

    pub fn state_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.state).map_err(serde_to_js_error)
    }

    pub fn state(&self) -> Result<JsValue, JsValue> {
        to_value(&self.state).map_err(JsValue::from)
    }

    pub fn set_state_json(&mut self, json: &str) -> Result<(), JsValue> {
        let state: GameState = serde_json::from_str(json).map_err(serde_to_js_error)?;
        self.state = state;
        Ok(())
    }

    // Setup configuration. Rejections are silent at this surface; the
    // previous value simply stays in place.

    pub fn set_player_count(&mut self, count: usize) -> bool {
        self.engine.set_player_count(&mut self.state, count).is_ok()
    }

    pub fn set_win_threshold(&mut self, threshold: Money) -> bool {
        self.engine
            .set_win_threshold(&mut self.state, threshold)
            .is_ok()
    }

    pub fn set_player_name(&mut self, seat: usize, name: &str) -> bool {
        self.engine
            .set_player_name(&mut self.state, seat, name)
            .is_ok()
    }

    pub fn start_game(&mut self) -> Result<String, JsValue> {
        self.run(|engine, state| engine.start_game(state))
    }

    pub fn new_game(&mut self) -> Result<String, JsValue> {
        self.run(|engine, state| engine.new_game(state))
    }

    pub fn roll_dice(&mut self) -> Result<String, JsValue> {
        self.run(|engine, state| engine.roll_dice(state))
    }

    pub fn buy_current_space(&mut self) -> Result<String, JsValue> {
        self.run(|engine, state| engine.buy_current_space(state))
    }

    pub fn skip_purchase(&mut self) -> Result<String, JsValue> {
        self.run(|engine, state| engine.skip_purchase(state))
    }

    pub fn pay_jail_fine(&mut self) -> Result<String, JsValue> {
        self.run(|engine, state| engine.pay_jail_fine(state))
    }

    pub fn accept_jail_term(&mut self) -> Result<String, JsValue> {
        self.run(|engine, state| engine.accept_jail_term(state))
    }

    pub fn improve_property(&mut self, space_id: usize) -> Result<String, JsValue> {
        self.run(|engine, state| engine.improve_property(state, space_id))
    }

    pub fn end_turn(&mut self) -> Result<String, JsValue> {
        self.run(|engine, state| engine.end_turn(state))
    }
}

impl GameEngine {
    fn run<F>(&mut self, command: F) -> Result<String, JsValue>
    where
        F: FnOnce(&mut TurnEngine, &mut GameState) -> Result<Vec<GameEvent>, RuleError>,
    {
        let events = command(&mut self.engine, &mut self.state).map_err(to_js_error)?;
        log_events(&self.state, &events);
        make_resolution_json(RuleResolution::new(&self.state, events))
    }
}

/// Fresh setup-phase state for the presentation layer to inspect.
#[wasm_bindgen(js_name = "createGameState")]
pub fn create_game_state() -> Result<JsValue, JsValue> {
    to_value(&GameState::default()).map_err(JsValue::from)
}

/// The immutable board table, for rendering.
#[wasm_bindgen(js_name = "boardLayout")]
pub fn board_layout() -> Result<JsValue, JsValue> {
    to_value(&*game::BOARD).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validateState")]
pub fn validate_state(state: JsValue) -> Result<(), JsValue> {
    let state: GameState = from_value(state).map_err(JsValue::from)?;
    state
        .integrity_check()
        .map_err(|detail| to_js_error(RuleError::IntegrityViolation { detail }))?;
    Ok(())
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
