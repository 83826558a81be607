use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::board::{
    self, Group, Money, Space, SpaceId, SpaceKind, BANKRUPTCY_THRESHOLD, BOARD_SIZE,
    DEFAULT_WIN_THRESHOLD, JAIL_INDEX, MAX_IMPROVEMENT_LEVEL, MIN_PLAYERS, PASS_START_SALARY,
    STARTING_MONEY, UTILITY_BASE_RENT,
};
use super::cards::{self, Card};

/// Player identifier. Doubles as the index into `GameState::players`.
pub type PlayerId = u8;

const MAX_EVENT_LOG: usize = 512;

pub const DEFAULT_PLAYER_NAMES: [&str; board::MAX_PLAYERS] =
    ["Rojo", "Azul", "Verde", "Amarillo", "Magenta"];
pub const DEFAULT_PLAYER_COLORS: [&str; board::MAX_PLAYERS] =
    ["#FF0000", "#0000FF", "#00FF00", "#FFFF00", "#FF00FF"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GamePhase {
    Setup,
    Playing,
    GameOver,
}

impl Default for GamePhase {
    fn default() -> Self {
        GamePhase::Setup
    }
}

/// Per-turn sub-state: what the current player may legally do next.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TurnStage {
    AwaitingRoll,
    AwaitingPurchaseDecision,
    AwaitingJailChoice,
    AwaitingEndTurn,
}

impl Default for TurnStage {
    fn default() -> Self {
        TurnStage::AwaitingRoll
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WinReason {
    Wealth,
    LastStanding,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outcome {
    pub winner: PlayerId,
    pub reason: WinReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeckKind {
    Community,
    Destiny,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JailRelease {
    Doubles,
    FinePaid,
    CardUsed,
}

/// One player's ledger: cash, holdings, improvements and jail state.
/// Ownership lives here and only here; the board table is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
    pub money: Money,
    pub position: SpaceId,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub properties: BTreeSet<SpaceId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub railroads: BTreeSet<SpaceId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub utilities: BTreeSet<SpaceId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub improvements: BTreeMap<SpaceId, u8>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub monopolies: BTreeSet<Group>,
    #[serde(default)]
    pub in_jail: bool,
    #[serde(default)]
    pub jail_turns: u8,
    #[serde(default)]
    pub get_out_of_jail_cards: u8,
    #[serde(default)]
    pub bankrupt: bool,
    #[serde(default)]
    pub skip_next_turn: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: color.into(),
            money: STARTING_MONEY,
            position: 0,
            properties: BTreeSet::new(),
            railroads: BTreeSet::new(),
            utilities: BTreeSet::new(),
            improvements: BTreeMap::new(),
            monopolies: BTreeSet::new(),
            in_jail: false,
            jail_turns: 0,
            get_out_of_jail_cards: 0,
            bankrupt: false,
            skip_next_turn: false,
        }
    }

    /// Debits `amount` iff the full amount is covered. Debts are never
    /// partially paid; on failure nothing changes.
    pub fn pay(&mut self, amount: Money) -> bool {
        if self.money >= amount {
            self.money -= amount;
            true
        } else {
            false
        }
    }

    pub fn receive(&mut self, amount: Money) {
        self.money += amount;
    }

    pub fn collect_salary(&mut self) -> Money {
        self.money += PASS_START_SALARY;
        PASS_START_SALARY
    }

    pub fn owns(&self, space_id: SpaceId) -> bool {
        self.properties.contains(&space_id)
            || self.railroads.contains(&space_id)
            || self.utilities.contains(&space_id)
    }

    pub fn owned_space_ids(&self) -> Vec<SpaceId> {
        self.properties
            .iter()
            .chain(self.railroads.iter())
            .chain(self.utilities.iter())
            .copied()
            .collect()
    }

    /// Buys an unowned space at its list price. The caller is responsible
    /// for checking that nobody else holds the title.
    pub fn acquire(&mut self, space: &Space) -> bool {
        self.acquire_at(space, space.price)
    }

    /// Buys at a custom price (discount cards). Fails without mutation on
    /// insufficient funds or an unownable space.
    pub fn acquire_at(&mut self, space: &Space, price: Money) -> bool {
        if !space.kind.is_ownable() || self.owns(space.id) || !self.pay(price) {
            return false;
        }
        match space.kind {
            SpaceKind::Property => {
                self.properties.insert(space.id);
                self.refresh_monopolies();
            }
            SpaceKind::Railroad => {
                self.railroads.insert(space.id);
            }
            _ => {
                self.utilities.insert(space.id);
            }
        }
        true
    }

    /// Recomputes the monopoly set from the owned properties.
    pub fn refresh_monopolies(&mut self) {
        self.monopolies.clear();
        for group in [Group::Costa, Group::Patagonia, Group::Norte, Group::Cuyo] {
            let owned = board::spaces_in_group(group)
                .filter(|space| self.properties.contains(&space.id))
                .count();
            if owned == board::group_size(group) {
                self.monopolies.insert(group);
            }
        }
    }

    pub fn improvement_level(&self, space_id: SpaceId) -> u8 {
        self.improvements.get(&space_id).copied().unwrap_or(0)
    }

    pub fn improvement_cost(space: &Space) -> Money {
        space.price / 2
    }

    pub fn can_improve(&self, space: &Space) -> bool {
        space.kind == SpaceKind::Property
            && self.properties.contains(&space.id)
            && space
                .group
                .map_or(false, |group| self.monopolies.contains(&group))
            && self.improvement_level(space.id) < MAX_IMPROVEMENT_LEVEL
    }

    /// Builds one improvement tier. Requires the monopoly, a free tier and
    /// the funds; no mutation otherwise.
    pub fn improve(&mut self, space: &Space) -> bool {
        if !self.can_improve(space) || !self.pay(Self::improvement_cost(space)) {
            return false;
        }
        *self.improvements.entry(space.id).or_insert(0) += 1;
        true
    }

    /// Rent owed to this player by someone landing on `space`.
    /// Dice-independent: the utility base is a fixed table amount.
    pub fn rent_for(&self, space: &Space) -> Money {
        match space.kind {
            SpaceKind::Property => {
                let level = self.improvement_level(space.id) as usize;
                let monopoly = space
                    .group
                    .map_or(false, |group| self.monopolies.contains(&group));
                if level == 0 {
                    if monopoly {
                        space.rent[0] * 2
                    } else {
                        space.rent[0]
                    }
                } else {
                    let tier = (2 + level).min(space.rent.len() - 1);
                    space.rent[tier]
                }
            }
            SpaceKind::Railroad => {
                let held = self.railroads.len().max(1);
                space.rent[(held - 1).min(space.rent.len() - 1)]
            }
            SpaceKind::Utility => {
                let percent: Money = match self.utilities.len() {
                    0 | 1 => 100,
                    2 => 125,
                    3 => 140,
                    _ => 160,
                };
                UTILITY_BASE_RENT * percent / 100
            }
            _ => 0,
        }
    }

    /// Cash plus face price of every holding. Display/tie-break only;
    /// bankruptcy is decided on cash.
    pub fn total_wealth(&self) -> Money {
        self.owned_space_ids()
            .into_iter()
            .map(|id| board::space(id).price)
            .sum::<Money>()
            + self.money
    }

    pub fn go_to_jail(&mut self) {
        self.position = JAIL_INDEX;
        self.in_jail = true;
        self.jail_turns = 0;
    }

    pub fn leave_jail(&mut self) {
        self.in_jail = false;
        self.jail_turns = 0;
    }

    /// Clears every holding; returns the released space ids.
    pub fn release_assets(&mut self) -> Vec<SpaceId> {
        let released = self.owned_space_ids();
        self.properties.clear();
        self.railroads.clear();
        self.utilities.clear();
        self.improvements.clear();
        self.monopolies.clear();
        released
    }
}

/// Everything that happened as a result of a command, in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GameEvent {
    GameStarted {
        player_count: usize,
        win_threshold: Money,
    },
    TurnStarted {
        player_id: PlayerId,
    },
    TurnSkipped {
        player_id: PlayerId,
    },
    DiceRolled {
        player_id: PlayerId,
        dice: [u8; 2],
    },
    StayedInJail {
        player_id: PlayerId,
        jail_turns: u8,
    },
    ReleasedFromJail {
        player_id: PlayerId,
        method: JailRelease,
    },
    Moved {
        player_id: PlayerId,
        from: SpaceId,
        to: SpaceId,
    },
    SalaryCollected {
        player_id: PlayerId,
        amount: Money,
    },
    PurchaseOffered {
        player_id: PlayerId,
        space_id: SpaceId,
        price: Money,
    },
    SpacePurchased {
        player_id: PlayerId,
        space_id: SpaceId,
        price: Money,
    },
    PurchaseDeclined {
        player_id: PlayerId,
        space_id: SpaceId,
    },
    MonopolyFormed {
        player_id: PlayerId,
        group: Group,
    },
    RentPaid {
        player_id: PlayerId,
        owner_id: PlayerId,
        space_id: SpaceId,
        amount: Money,
    },
    TaxPaid {
        player_id: PlayerId,
        amount: Money,
    },
    CardDrawn {
        player_id: PlayerId,
        deck: DeckKind,
        card_id: u32,
        title: String,
    },
    MoneyCollected {
        player_id: PlayerId,
        amount: Money,
    },
    MoneyPaid {
        player_id: PlayerId,
        amount: Money,
    },
    JailCardGranted {
        player_id: PlayerId,
    },
    SentToJail {
        player_id: PlayerId,
    },
    JailChoiceRequired {
        player_id: PlayerId,
    },
    JailFinePaid {
        player_id: PlayerId,
        amount: Money,
    },
    JailAccepted {
        player_id: PlayerId,
    },
    NegotiationOpportunity {
        player_id: PlayerId,
        candidates: Vec<PlayerId>,
    },
    PropertyImproved {
        player_id: PlayerId,
        space_id: SpaceId,
        level: u8,
        cost: Money,
    },
    PlayerBankrupt {
        player_id: PlayerId,
        released: Vec<SpaceId>,
    },
    ExtraRollGranted {
        player_id: PlayerId,
    },
    DoublesRerollGranted {
        player_id: PlayerId,
    },
    TurnEnded {
        player_id: PlayerId,
        next_player: PlayerId,
    },
    GameOver {
        winner: PlayerId,
        reason: WinReason,
    },
}

impl GameEvent {
    /// Human log line for the presentation layer, in the original game's voice.
    pub fn describe(&self, state: &GameState) -> String {
        let name = |id: &PlayerId| state.player_name(*id);
        let space_name = |id: &SpaceId| board::space(*id).name;
        match self {
            GameEvent::GameStarted {
                player_count,
                win_threshold,
            } => format!(
                "¡Comienza la partida con {player_count} jugadores! Meta de victoria: ${win_threshold}"
            ),
            GameEvent::TurnStarted { player_id } => format!("Turno de {}", name(player_id)),
            GameEvent::TurnSkipped { player_id } => {
                format!("{} pierde este turno", name(player_id))
            }
            GameEvent::DiceRolled { player_id, dice } => format!(
                "{} tiró los dados: {} + {} = {}",
                name(player_id),
                dice[0],
                dice[1],
                dice[0] + dice[1]
            ),
            GameEvent::StayedInJail {
                player_id,
                jail_turns,
            } => format!(
                "{} permanece en la cárcel (turno {jail_turns}/3)",
                name(player_id)
            ),
            GameEvent::ReleasedFromJail { player_id, .. } => {
                format!("¡{} sale de la cárcel!", name(player_id))
            }
            GameEvent::Moved { player_id, to, .. } => {
                format!("{} llega a {}", name(player_id), space_name(to))
            }
            GameEvent::SalaryCollected { player_id, amount } => {
                format!("{} pasa por LARGADA y cobra ${amount}", name(player_id))
            }
            GameEvent::PurchaseOffered {
                space_id, price, ..
            } => format!("{} está disponible por ${price}", space_name(space_id)),
            GameEvent::SpacePurchased {
                player_id,
                space_id,
                price,
            } => format!(
                "{} compra {} por ${price}",
                name(player_id),
                space_name(space_id)
            ),
            GameEvent::PurchaseDeclined {
                player_id,
                space_id,
            } => format!(
                "{} decide no comprar {}",
                name(player_id),
                space_name(space_id)
            ),
            GameEvent::MonopolyFormed { player_id, group } => format!(
                "¡{} tiene el monopolio de {}!",
                name(player_id),
                group.display_name()
            ),
            GameEvent::RentPaid {
                player_id,
                owner_id,
                amount,
                ..
            } => format!(
                "{} paga ${amount} de alquiler a {}",
                name(player_id),
                name(owner_id)
            ),
            GameEvent::TaxPaid { player_id, amount } => {
                format!("{} paga ${amount} en impuestos", name(player_id))
            }
            GameEvent::CardDrawn {
                player_id, title, ..
            } => format!("{} saca una carta: {title}", name(player_id)),
            GameEvent::MoneyCollected { player_id, amount } => {
                format!("{} recibe ${amount}", name(player_id))
            }
            GameEvent::MoneyPaid { player_id, amount } => {
                format!("{} paga ${amount}", name(player_id))
            }
            GameEvent::JailCardGranted { player_id } => format!(
                "{} obtiene una carta para salir de la cárcel",
                name(player_id)
            ),
            GameEvent::SentToJail { player_id } => {
                format!("¡{} va directo a la cárcel!", name(player_id))
            }
            GameEvent::JailChoiceRequired { player_id } => {
                format!("{} ha llegado a la cárcel y debe decidir", name(player_id))
            }
            GameEvent::JailFinePaid { player_id, amount } => {
                format!("{} pagó ${amount} para evitar la cárcel", name(player_id))
            }
            GameEvent::JailAccepted { player_id } => {
                format!("{} aceptó ir a la cárcel por 3 turnos", name(player_id))
            }
            GameEvent::NegotiationOpportunity { player_id, .. } => format!(
                "{} llega a NEGOCIACIÓN: hora de intercambiar propiedades",
                name(player_id)
            ),
            GameEvent::PropertyImproved {
                player_id,
                space_id,
                level,
                cost,
            } => format!(
                "{} mejora {} (nivel {level}) por ${cost}",
                name(player_id),
                space_name(space_id)
            ),
            GameEvent::PlayerBankrupt { player_id, .. } => {
                format!("¡{} ha quedado en BANCARROTA!", name(player_id))
            }
            GameEvent::ExtraRollGranted { player_id } => {
                format!("¡{} puede tirar los dados nuevamente!", name(player_id))
            }
            GameEvent::DoublesRerollGranted { player_id } => {
                format!("¡{} sacó dobles! Tira otra vez", name(player_id))
            }
            GameEvent::TurnEnded { next_player, .. } => {
                format!("Turno de {}", name(next_player))
            }
            GameEvent::GameOver { winner, reason } => match reason {
                WinReason::Wealth => {
                    format!("¡{} GANA! Alcanzó la meta de dinero", name(winner))
                }
                WinReason::LastStanding => {
                    format!("¡{} GANA! Es el último jugador en pie", name(winner))
                }
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IntegrityError {
    CurrentPlayerOutOfRange { index: usize },
    CurrentPlayerBankrupt { player_id: PlayerId },
    PositionOutOfRange { player_id: PlayerId, position: SpaceId },
    DuplicateOwnership { space_id: SpaceId },
    MonopolyMismatch { player_id: PlayerId, group: Group },
    ImprovementOutOfRange { player_id: PlayerId, space_id: SpaceId },
    ImprovementWithoutMonopoly { player_id: PlayerId, space_id: SpaceId },
    NoActivePlayers,
}

/// Whole-game state. Recreated wholesale by `new_game`; serialized as the
/// snapshot handed to the presentation layer after every command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameState {
    #[serde(default)]
    pub players: Vec<Player>,
    pub current_player: usize,
    pub phase: GamePhase,
    pub stage: TurnStage,
    pub last_dice: [u8; 2],
    pub win_threshold: Money,
    pub bankruptcy_threshold: Money,
    pub selected_player_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_overrides: Vec<Option<String>>,
    #[serde(default)]
    pub community_order: Vec<usize>,
    #[serde(default)]
    pub community_cursor: usize,
    #[serde(default)]
    pub destiny_order: Vec<usize>,
    #[serde(default)]
    pub destiny_cursor: usize,
    #[serde(default)]
    pub force_end_turn: bool,
    #[serde(default)]
    pub doubles_suppressed: bool,
    #[serde(default)]
    pub reroll_pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_log: Vec<GameEvent>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            players: Vec::new(),
            current_player: 0,
            phase: GamePhase::Setup,
            stage: TurnStage::AwaitingRoll,
            last_dice: [0, 0],
            win_threshold: DEFAULT_WIN_THRESHOLD,
            bankruptcy_threshold: BANKRUPTCY_THRESHOLD,
            selected_player_count: MIN_PLAYERS,
            name_overrides: vec![None; board::MAX_PLAYERS],
            community_order: Vec::new(),
            community_cursor: 0,
            destiny_order: Vec::new(),
            destiny_cursor: 0,
            force_end_turn: false,
            doubles_suppressed: false,
            reroll_pending: false,
            outcome: None,
            event_log: Vec::new(),
        }
    }
}

impl GameState {
    pub fn record_event(&mut self, event: GameEvent) {
        if self.event_log.len() >= MAX_EVENT_LOG {
            self.event_log.remove(0);
        }
        self.event_log.push(event);
    }

    pub fn current(&self) -> &Player {
        &self.players[self.current_player]
    }

    pub fn current_mut(&mut self) -> &mut Player {
        &mut self.players[self.current_player]
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(id as usize)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id as usize)
    }

    pub fn player_name(&self, id: PlayerId) -> String {
        self.player(id)
            .map(|player| player.name.clone())
            .unwrap_or_else(|| format!("Jugador {id}"))
    }

    /// External ownership index: which player, if any, holds the title.
    pub fn owner_of(&self, space_id: SpaceId) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|player| player.owns(space_id))
            .map(|player| player.id)
    }

    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|player| !player.bankrupt)
    }

    pub fn active_count(&self) -> usize {
        self.active_players().count()
    }

    /// Poorest solvent player other than `player_id`, by cash.
    pub fn poorest_other(&self, player_id: PlayerId) -> Option<PlayerId> {
        self.active_players()
            .filter(|player| player.id != player_id)
            .min_by_key(|player| player.money)
            .map(|player| player.id)
    }

    /// Solvent players other than `player_id` holding at least one title.
    pub fn negotiation_candidates(&self, player_id: PlayerId) -> Vec<PlayerId> {
        self.active_players()
            .filter(|player| player.id != player_id && !player.owned_space_ids().is_empty())
            .map(|player| player.id)
            .collect()
    }

    pub fn most_expensive_unowned_property(&self) -> Option<&'static Space> {
        board::BOARD
            .iter()
            .filter(|space| space.kind == SpaceKind::Property && self.owner_of(space.id).is_none())
            .max_by_key(|space| space.price)
    }

    pub fn is_finished(&self) -> bool {
        self.phase == GamePhase::GameOver
    }

    /// Next non-bankrupt player after `from`, wrapping. At least one
    /// active player always exists while the game is in `Playing`.
    pub fn next_active_index(&self, from: usize) -> usize {
        let count = self.players.len();
        let mut idx = (from + 1) % count;
        while self.players[idx].bankrupt {
            idx = (idx + 1) % count;
        }
        idx
    }

    pub fn draw_community(&mut self) -> &'static Card {
        draw_from(
            &mut self.community_order,
            &mut self.community_cursor,
            cards::community_cards(),
        )
    }

    pub fn draw_destiny(&mut self) -> &'static Card {
        draw_from(
            &mut self.destiny_order,
            &mut self.destiny_cursor,
            cards::destiny_cards(),
        )
    }

    /// Idempotent winner declaration (first call wins).
    pub fn declare_winner(&mut self, winner: PlayerId, reason: WinReason) -> Vec<GameEvent> {
        if self.outcome.is_some() {
            return Vec::new();
        }
        self.outcome = Some(Outcome { winner, reason });
        self.phase = GamePhase::GameOver;
        let event = GameEvent::GameOver { winner, reason };
        self.record_event(event.clone());
        vec![event]
    }

    /// Marks a player bankrupt, releases every title they held and runs
    /// the last-standing check.
    pub fn declare_bankrupt(&mut self, player_id: PlayerId) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let Some(player) = self.player_mut(player_id) else {
            return events;
        };
        if player.bankrupt {
            return events;
        }
        player.bankrupt = true;
        let released = player.release_assets();
        let event = GameEvent::PlayerBankrupt {
            player_id,
            released,
        };
        self.record_event(event.clone());
        events.push(event);

        let survivor = {
            let mut active = self.active_players();
            match (active.next(), active.next()) {
                (Some(last), None) => Some(last.id),
                _ => None,
            }
        };
        if let Some(winner) = survivor {
            events.extend(self.declare_winner(winner, WinReason::LastStanding));
        }
        events
    }

    /// End-of-action checks, in order: cash-floor bankruptcy (which may end
    /// the game by last standing), then the wealth goal.
    pub fn check_game_end(&mut self) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let broke: Vec<PlayerId> = self
            .active_players()
            .filter(|player| player.money <= self.bankruptcy_threshold)
            .map(|player| player.id)
            .collect();
        for player_id in broke {
            events.extend(self.declare_bankrupt(player_id));
            if self.is_finished() {
                return events;
            }
        }
        let rich = self
            .active_players()
            .find(|player| player.money >= self.win_threshold)
            .map(|player| player.id);
        if let Some(winner) = rich {
            events.extend(self.declare_winner(winner, WinReason::Wealth));
        }
        events
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        if self.phase != GamePhase::Playing {
            return Ok(());
        }
        if self.active_count() == 0 {
            return Err(IntegrityError::NoActivePlayers);
        }
        let Some(current) = self.players.get(self.current_player) else {
            return Err(IntegrityError::CurrentPlayerOutOfRange {
                index: self.current_player,
            });
        };
        if current.bankrupt {
            return Err(IntegrityError::CurrentPlayerBankrupt {
                player_id: current.id,
            });
        }
        let mut owned = BTreeSet::new();
        for player in &self.players {
            if player.position >= BOARD_SIZE {
                return Err(IntegrityError::PositionOutOfRange {
                    player_id: player.id,
                    position: player.position,
                });
            }
            for space_id in player.owned_space_ids() {
                if !owned.insert(space_id) {
                    return Err(IntegrityError::DuplicateOwnership { space_id });
                }
            }
            for group in [Group::Costa, Group::Patagonia, Group::Norte, Group::Cuyo] {
                let held = board::spaces_in_group(group)
                    .filter(|space| player.properties.contains(&space.id))
                    .count();
                let complete = held == board::group_size(group);
                if complete != player.monopolies.contains(&group) {
                    return Err(IntegrityError::MonopolyMismatch {
                        player_id: player.id,
                        group,
                    });
                }
            }
            for (&space_id, &level) in &player.improvements {
                if level > MAX_IMPROVEMENT_LEVEL {
                    return Err(IntegrityError::ImprovementOutOfRange {
                        player_id: player.id,
                        space_id,
                    });
                }
                let in_monopoly = board::space(space_id)
                    .group
                    .map_or(false, |group| player.monopolies.contains(&group));
                if level > 0 && !in_monopoly {
                    return Err(IntegrityError::ImprovementWithoutMonopoly {
                        player_id: player.id,
                        space_id,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Cyclic deck draw. An external snapshot may arrive without a usable
/// deck order or with a stale cursor; those fall back to table order and
/// a wrapped cursor rather than failing the draw.
fn draw_from<'a>(order: &mut Vec<usize>, cursor: &mut usize, deck: &'a [Card]) -> &'a Card {
    if order.is_empty() || order.iter().any(|&idx| idx >= deck.len()) {
        *order = (0..deck.len()).collect();
        *cursor = 0;
    }
    *cursor %= order.len();
    let card = &deck[order[*cursor]];
    *cursor = (*cursor + 1) % order.len();
    card
}
