use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Cash amounts in pesos. Signed: a player's balance may dip below zero
/// at a turn boundary before bankruptcy is resolved.
pub type Money = i64;
/// Index into the board cycle.
pub type SpaceId = usize;

pub const BOARD_SIZE: usize = 28;
pub const JAIL_INDEX: SpaceId = 7;

pub const STARTING_MONEY: Money = 1_500_000;
pub const PASS_START_SALARY: Money = 200_000;
pub const JAIL_FINE: Money = 750_000;
pub const TAX_AMOUNT: Money = 100_000;
pub const UTILITY_BASE_RENT: Money = 25_000;
pub const MAX_IMPROVEMENT_LEVEL: u8 = 3;
pub const MAX_JAIL_TURNS: u8 = 3;

pub const DEFAULT_WIN_THRESHOLD: Money = 7_500_000;
pub const MIN_WIN_THRESHOLD: Money = 1_000_000;
pub const MAX_WIN_THRESHOLD: Money = 50_000_000;
pub const BANKRUPTCY_THRESHOLD: Money = -1_000_000;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 5;

/// Regional color groups of the property spaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    Costa,
    Patagonia,
    Norte,
    Cuyo,
}

impl Group {
    pub fn display_name(&self) -> &'static str {
        match self {
            Group::Costa => "Costa Atlántica",
            Group::Patagonia => "Patagonia",
            Group::Norte => "Norte",
            Group::Cuyo => "Cuyo",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpaceKind {
    Start,
    Property,
    Railroad,
    Utility,
    Tax,
    CommunityChest,
    Chance,
    Destiny,
    Negotiation,
    GoToJail,
    Jail,
    FreeParking,
}

impl SpaceKind {
    /// Spaces a player can hold title to.
    pub fn is_ownable(&self) -> bool {
        matches!(
            self,
            SpaceKind::Property | SpaceKind::Railroad | SpaceKind::Utility
        )
    }
}

/// One board space. Immutable rule data: ownership is tracked on the
/// players, never here, so many games can share this table.
#[derive(Debug, Clone, Serialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: &'static str,
    pub kind: SpaceKind,
    pub price: Money,
    /// Rent schedule. Properties: 6 tiers (base, then improvement tiers).
    /// Railroads: rent by number of railroads the owner holds.
    pub rent: &'static [Money],
    pub group: Option<Group>,
}

const RAILROAD_RENT: &[Money] = &[25_000, 50_000, 100_000, 200_000];
const RAILROAD_PRICE: Money = 200_000;
const UTILITY_PRICE: Money = 150_000;

fn property(
    id: SpaceId,
    name: &'static str,
    price: Money,
    rent: &'static [Money],
    group: Group,
) -> Space {
    Space {
        id,
        name,
        kind: SpaceKind::Property,
        price,
        rent,
        group: Some(group),
    }
}

fn railroad(id: SpaceId, name: &'static str) -> Space {
    Space {
        id,
        name,
        kind: SpaceKind::Railroad,
        price: RAILROAD_PRICE,
        rent: RAILROAD_RENT,
        group: None,
    }
}

fn utility(id: SpaceId, name: &'static str) -> Space {
    Space {
        id,
        name,
        kind: SpaceKind::Utility,
        price: UTILITY_PRICE,
        rent: &[],
        group: None,
    }
}

fn special(id: SpaceId, name: &'static str, kind: SpaceKind) -> Space {
    Space {
        id,
        name,
        kind,
        price: 0,
        rent: &[],
        group: None,
    }
}

/// The 28-space board cycle, Argentine edition.
pub static BOARD: Lazy<Vec<Space>> = Lazy::new(|| {
    let spaces = vec![
        special(0, "Largada", SpaceKind::Start),
        property(
            1,
            "Mar del Plata",
            60_000,
            &[2_000, 10_000, 30_000, 90_000, 160_000, 250_000],
            Group::Costa,
        ),
        special(2, "Caja Comunitaria", SpaceKind::CommunityChest),
        property(
            3,
            "Villa Gesell",
            80_000,
            &[4_000, 20_000, 60_000, 180_000, 320_000, 450_000],
            Group::Costa,
        ),
        property(
            4,
            "San Bernardo",
            100_000,
            &[6_000, 30_000, 90_000, 270_000, 400_000, 550_000],
            Group::Costa,
        ),
        railroad(5, "Aeropuerto Ezeiza"),
        utility(6, "YPF"),
        special(7, "Cárcel", SpaceKind::Jail),
        property(
            8,
            "Bariloche",
            140_000,
            &[10_000, 50_000, 150_000, 450_000, 625_000, 750_000],
            Group::Patagonia,
        ),
        property(
            9,
            "Calafate",
            160_000,
            &[12_000, 60_000, 180_000, 500_000, 700_000, 900_000],
            Group::Patagonia,
        ),
        special(10, "Destino", SpaceKind::Destiny),
        property(
            11,
            "Ushuaia",
            180_000,
            &[14_000, 70_000, 200_000, 550_000, 750_000, 950_000],
            Group::Patagonia,
        ),
        railroad(12, "Terminal Retiro"),
        special(13, "Impuestos Nacionales", SpaceKind::Tax),
        special(14, "Estacionamiento Libre", SpaceKind::FreeParking),
        property(
            15,
            "Salta",
            220_000,
            &[18_000, 90_000, 250_000, 700_000, 875_000, 1_050_000],
            Group::Norte,
        ),
        utility(16, "Edesur"),
        property(
            17,
            "Tucumán",
            240_000,
            &[20_000, 100_000, 300_000, 750_000, 925_000, 1_100_000],
            Group::Norte,
        ),
        property(
            18,
            "Jujuy",
            260_000,
            &[22_000, 110_000, 330_000, 800_000, 975_000, 1_150_000],
            Group::Norte,
        ),
        railroad(19, "Subte Línea D"),
        special(20, "Azar", SpaceKind::Chance),
        special(21, "Ve a la Cárcel", SpaceKind::GoToJail),
        property(
            22,
            "Mendoza",
            280_000,
            &[24_000, 120_000, 360_000, 850_000, 1_025_000, 1_200_000],
            Group::Cuyo,
        ),
        utility(23, "Aguas Argentinas"),
        property(
            24,
            "San Juan",
            300_000,
            &[26_000, 130_000, 390_000, 900_000, 1_100_000, 1_275_000],
            Group::Cuyo,
        ),
        special(25, "Negociación", SpaceKind::Negotiation),
        railroad(26, "Tren a Tigre"),
        utility(27, "Gas del Estado"),
    ];
    debug_assert_eq!(spaces.len(), BOARD_SIZE);
    spaces
});

pub fn space(id: SpaceId) -> &'static Space {
    &BOARD[id % BOARD_SIZE]
}

/// Number of properties in a color group. Owning all of them is a monopoly.
pub fn group_size(group: Group) -> usize {
    BOARD
        .iter()
        .filter(|space| space.group == Some(group))
        .count()
}

pub fn spaces_in_group(group: Group) -> impl Iterator<Item = &'static Space> {
    BOARD.iter().filter(move |space| space.group == Some(group))
}
