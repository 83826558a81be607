use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::board::Money;
use super::state::{GameEvent, GameState, PlayerId};

/// What drawing a card does. Closed set; resolution is an exhaustive match,
/// so a new card action cannot ship without its semantics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum CardAction {
    Collect { amount: Money },
    Pay { amount: Money },
    GoToJail,
    GetOutOfJailFree,
    PayPercentage { percent: u8 },
    CollectFromAll { amount: Money },
    LoseTurn,
    GoToStart,
    DiscountProperty { percent: u8 },
    PayToPoorest { percent: u8 },
    ExtraRoll,
    AllPayPercentage { percent: u8 },
}

/// How the resolved card constrains the rest of the turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardOutcome {
    pub forced_end: bool,
    pub extra_roll: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Card {
    pub id: u32,
    pub title: &'static str,
    pub description: &'static str,
    pub action: CardAction,
}

impl CardAction {
    /// Resolves the action against the live state. Events are recorded in
    /// the state log and returned. Card debits may push a balance below
    /// zero; the turn-boundary floor check settles that later.
    pub fn apply(&self, state: &mut GameState, player_id: PlayerId) -> (Vec<GameEvent>, CardOutcome) {
        let mut events = Vec::new();
        let mut outcome = CardOutcome::default();
        let emit = |state: &mut GameState, events: &mut Vec<GameEvent>, event: GameEvent| {
            state.record_event(event.clone());
            events.push(event);
        };
        match *self {
            CardAction::Collect { amount } => {
                if let Some(player) = state.player_mut(player_id) {
                    player.receive(amount);
                    emit(state, &mut events, GameEvent::MoneyCollected { player_id, amount });
                }
            }
            CardAction::Pay { amount } => {
                if let Some(player) = state.player_mut(player_id) {
                    player.money -= amount;
                    emit(state, &mut events, GameEvent::MoneyPaid { player_id, amount });
                }
            }
            CardAction::GoToJail => {
                if let Some(player) = state.player_mut(player_id) {
                    player.go_to_jail();
                    emit(state, &mut events, GameEvent::SentToJail { player_id });
                    outcome.forced_end = true;
                }
            }
            CardAction::GetOutOfJailFree => {
                if let Some(player) = state.player_mut(player_id) {
                    player.get_out_of_jail_cards += 1;
                    emit(state, &mut events, GameEvent::JailCardGranted { player_id });
                }
            }
            CardAction::PayPercentage { percent } => {
                if let Some(player) = state.player_mut(player_id) {
                    let amount = (player.money.max(0) * percent as Money) / 100;
                    if amount > 0 {
                        player.money -= amount;
                        emit(state, &mut events, GameEvent::MoneyPaid { player_id, amount });
                    }
                }
            }
            CardAction::CollectFromAll { amount } => {
                // Insolvent payers are skipped outright; a birthday card
                // never bankrupts anyone.
                let payers: Vec<PlayerId> = state
                    .active_players()
                    .filter(|player| player.id != player_id && player.money >= amount)
                    .map(|player| player.id)
                    .collect();
                let mut collected = 0;
                for payer in payers {
                    if let Some(player) = state.player_mut(payer) {
                        if player.pay(amount) {
                            collected += amount;
                            emit(
                                state,
                                &mut events,
                                GameEvent::MoneyPaid {
                                    player_id: payer,
                                    amount,
                                },
                            );
                        }
                    }
                }
                if collected > 0 {
                    if let Some(player) = state.player_mut(player_id) {
                        player.receive(collected);
                        emit(
                            state,
                            &mut events,
                            GameEvent::MoneyCollected {
                                player_id,
                                amount: collected,
                            },
                        );
                    }
                }
            }
            CardAction::LoseTurn => {
                if let Some(player) = state.player_mut(player_id) {
                    player.skip_next_turn = true;
                }
            }
            CardAction::GoToStart => {
                if let Some(player) = state.player_mut(player_id) {
                    let from = player.position;
                    player.position = 0;
                    let salary = player.collect_salary();
                    emit(
                        state,
                        &mut events,
                        GameEvent::Moved {
                            player_id,
                            from,
                            to: 0,
                        },
                    );
                    emit(
                        state,
                        &mut events,
                        GameEvent::SalaryCollected {
                            player_id,
                            amount: salary,
                        },
                    );
                }
            }
            CardAction::DiscountProperty { percent } => {
                if let Some(space) = state.most_expensive_unowned_property() {
                    let price = space.price * (100 - percent as Money) / 100;
                    if let Some(player) = state.player_mut(player_id) {
                        let monopolies_before = player.monopolies.clone();
                        if player.acquire_at(space, price) {
                            let new_monopoly = player
                                .monopolies
                                .difference(&monopolies_before)
                                .next()
                                .copied();
                            emit(
                                state,
                                &mut events,
                                GameEvent::SpacePurchased {
                                    player_id,
                                    space_id: space.id,
                                    price,
                                },
                            );
                            if let Some(group) = new_monopoly {
                                emit(
                                    state,
                                    &mut events,
                                    GameEvent::MonopolyFormed { player_id, group },
                                );
                            }
                        }
                    }
                }
            }
            CardAction::PayToPoorest { percent } => {
                if let Some(poorest) = state.poorest_other(player_id) {
                    let amount = state
                        .player(player_id)
                        .map(|player| (player.money.max(0) * percent as Money) / 100)
                        .unwrap_or(0);
                    if amount > 0 {
                        if let Some(player) = state.player_mut(player_id) {
                            player.money -= amount;
                        }
                        if let Some(player) = state.player_mut(poorest) {
                            player.receive(amount);
                        }
                        emit(state, &mut events, GameEvent::MoneyPaid { player_id, amount });
                        emit(
                            state,
                            &mut events,
                            GameEvent::MoneyCollected {
                                player_id: poorest,
                                amount,
                            },
                        );
                    }
                }
            }
            CardAction::ExtraRoll => {
                outcome.extra_roll = true;
                emit(state, &mut events, GameEvent::ExtraRollGranted { player_id });
            }
            CardAction::AllPayPercentage { percent } => {
                // Money is destroyed here; there is no recipient.
                let hits: Vec<(PlayerId, Money)> = state
                    .active_players()
                    .filter(|player| player.money > 0)
                    .map(|player| (player.id, player.money * percent as Money / 100))
                    .filter(|&(_, amount)| amount > 0)
                    .collect();
                for (hit_id, amount) in hits {
                    if let Some(player) = state.player_mut(hit_id) {
                        player.money -= amount;
                        emit(
                            state,
                            &mut events,
                            GameEvent::MoneyPaid {
                                player_id: hit_id,
                                amount,
                            },
                        );
                    }
                }
            }
        }
        (events, outcome)
    }
}

/// Community pile: social and economic events around the neighborhood.
static COMMUNITY_CARDS: Lazy<Vec<Card>> = Lazy::new(|| {
    let mut id = 0;
    let mut card = |title, description, action| {
        id += 1;
        Card {
            id: id - 1,
            title,
            description,
            action,
        }
    };
    vec![
        card(
            "Devolución de impuestos",
            "La AFIP te devuelve impuestos. Cobra $100.000.",
            CardAction::Collect { amount: 100_000 },
        ),
        card(
            "Herencia inesperada",
            "Un tío lejano te deja su fortuna. Cobra $200.000.",
            CardAction::Collect { amount: 200_000 },
        ),
        card(
            "Venta de acciones",
            "Vendés tus acciones en alza. Cobra $150.000.",
            CardAction::Collect { amount: 150_000 },
        ),
        card(
            "Premio de la quiniela",
            "¡Salió tu número! Cobra $250.000.",
            CardAction::Collect { amount: 250_000 },
        ),
        card(
            "Error bancario a tu favor",
            "El banco se equivoca y te acredita $120.000.",
            CardAction::Collect { amount: 120_000 },
        ),
        card(
            "Cobro del seguro",
            "El seguro paga el siniestro. Cobra $80.000.",
            CardAction::Collect { amount: 80_000 },
        ),
        card(
            "Honorarios médicos",
            "Visita a la prepaga. Paga $100.000.",
            CardAction::Pay { amount: 100_000 },
        ),
        card(
            "Gastos escolares",
            "Útiles y cuotas del colegio. Paga $150.000.",
            CardAction::Pay { amount: 150_000 },
        ),
        card(
            "Reparaciones en casa",
            "Se rompió la caldera. Paga $120.000.",
            CardAction::Pay { amount: 120_000 },
        ),
        card(
            "Multa de tránsito",
            "Fotomulta en la Panamericana. Paga $50.000.",
            CardAction::Pay { amount: 50_000 },
        ),
        card(
            "Expensas del consorcio",
            "Expensas extraordinarias. Paga $80.000.",
            CardAction::Pay { amount: 80_000 },
        ),
        card(
            "¡Es tu cumpleaños!",
            "Cada jugador te regala $50.000.",
            CardAction::CollectFromAll { amount: 50_000 },
        ),
        card(
            "Honorarios de consultoría",
            "Cada jugador te paga $30.000 por tus consejos.",
            CardAction::CollectFromAll { amount: 30_000 },
        ),
        card(
            "Evasión impositiva",
            "La AFIP te descubre. Ve directo a la cárcel.",
            CardAction::GoToJail,
        ),
        card(
            "Salida de la cárcel",
            "Conserva esta carta para salir de la cárcel gratis.",
            CardAction::GetOutOfJailFree,
        ),
        card(
            "Fondos sin declarar",
            "Aparece plata en el colchón. Cobra $60.000.",
            CardAction::Collect { amount: 60_000 },
        ),
    ]
});

/// Destiny pile: fate events. Shared by the Azar and Destino spaces.
static DESTINY_CARDS: Lazy<Vec<Card>> = Lazy::new(|| {
    let mut id = 0;
    let mut card = |title, description, action| {
        id += 1;
        Card {
            id: id - 1,
            title,
            description,
            action,
        }
    };
    vec![
        card(
            "Avanza hasta la LARGADA",
            "Avanza directo a la Largada y cobra el salario.",
            CardAction::GoToStart,
        ),
        card(
            "Ve a la cárcel",
            "Ve directo a la cárcel sin pasar por la Largada.",
            CardAction::GoToJail,
        ),
        card(
            "El destino te sonríe",
            "Un golpe de suerte. Cobra $300.000.",
            CardAction::Collect { amount: 300_000 },
        ),
        card(
            "Golpe de mala suerte",
            "Todo sale mal esta semana. Paga $200.000.",
            CardAction::Pay { amount: 200_000 },
        ),
        card(
            "Inflación galopante",
            "Los precios se disparan. Todos pierden el 10% de su efectivo.",
            CardAction::AllPayPercentage { percent: 10 },
        ),
        card(
            "Impuesto a la riqueza",
            "Aporte extraordinario. Paga el 15% de tu efectivo.",
            CardAction::PayPercentage { percent: 15 },
        ),
        card(
            "Corralito",
            "El banco retiene tus depósitos. Paga el 20% de tu efectivo.",
            CardAction::PayPercentage { percent: 20 },
        ),
        card(
            "Solidaridad",
            "Doná el 15% de tu efectivo al jugador más pobre.",
            CardAction::PayToPoorest { percent: 15 },
        ),
        card(
            "Oportunidad inmobiliaria",
            "Comprás la propiedad libre más cara con 50% de descuento.",
            CardAction::DiscountProperty { percent: 50 },
        ),
        card(
            "Energía renovada",
            "¡Tira los dados otra vez!",
            CardAction::ExtraRoll,
        ),
        card(
            "Paro general",
            "No se mueve nadie. Perdés tu próximo turno.",
            CardAction::LoseTurn,
        ),
        card(
            "Salida de la cárcel",
            "Conserva esta carta para salir de la cárcel gratis.",
            CardAction::GetOutOfJailFree,
        ),
        card(
            "Cosecha récord",
            "El campo rinde como nunca. Cobra $250.000.",
            CardAction::Collect { amount: 250_000 },
        ),
        card(
            "Sequía en el campo",
            "La cosecha se pierde. Paga $150.000.",
            CardAction::Pay { amount: 150_000 },
        ),
        card(
            "Aguinaldo",
            "Llega el medio aguinaldo. Cobra $180.000.",
            CardAction::Collect { amount: 180_000 },
        ),
        card(
            "Juicio laboral",
            "Perdés el juicio. Paga $180.000.",
            CardAction::Pay { amount: 180_000 },
        ),
    ]
});

pub fn community_cards() -> &'static [Card] {
    &COMMUNITY_CARDS
}

pub fn destiny_cards() -> &'static [Card] {
    &DESTINY_CARDS
}
