// Seat map generation and interactive seat selection for one booking flow.
// The map is generated once per flow; selection rules keep the selection within the passenger count.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SeatConfig;

#[derive(Error, Debug, PartialEq)]
pub enum SeatError {
    #[error("Seat {seat_id} is {status} and cannot be selected")]
    UnavailableSeat { seat_id: String, status: SeatStatus },

    #[error("Selection limit reached: {limit} seat(s) already selected")]
    CapacityExceeded { limit: usize },

    #[error("Incomplete selection: {selected} of {required} seat(s) selected")]
    IncompleteSelection { selected: usize, required: usize },

    #[error("Unknown seat: {0}")]
    UnknownSeat(String),

    #[error("Unknown cabin class: {0}")]
    UnknownCabinClass(String),

    #[error("At least one passenger is required")]
    NoPassengers,

    #[error("Invalid seat map: {0}")]
    InvalidSeatMap(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CabinClass {
    Economy,
    Business,
    First,
}

// Column groups are separated by aisles
const FIRST_GROUPS: &[&[char]] = &[&['A', 'B'], &['D', 'E']];
const BUSINESS_GROUPS: &[&[char]] = &[&['A', 'B'], &['C', 'D'], &['E', 'F']];
const ECONOMY_GROUPS: &[&[char]] = &[&['A', 'B', 'C'], &['D', 'E', 'F'], &['G', 'H', 'I']];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CabinLayout {
    pub rows: u32,
    pub column_groups: &'static [&'static [char]],
}

impl CabinLayout {
    pub fn columns(&self) -> impl Iterator<Item = char> + '_ {
        self.column_groups.iter().flat_map(|group| group.iter().copied())
    }

    pub fn seats_per_row(&self) -> usize {
        self.column_groups.iter().map(|group| group.len()).sum()
    }

    pub fn capacity(&self) -> usize {
        self.rows as usize * self.seats_per_row()
    }

    // Outermost column on each side of the cabin
    fn is_window(&self, column: char) -> bool {
        let first = self.column_groups.first().and_then(|g| g.first());
        let last = self.column_groups.last().and_then(|g| g.last());
        first == Some(&column) || last == Some(&column)
    }

    // Columns that border an aisle between two groups
    fn is_aisle(&self, column: char) -> bool {
        let groups = self.column_groups.len();
        self.column_groups.iter().enumerate().any(|(i, group)| {
            (i + 1 < groups && group.last() == Some(&column))
                || (i > 0 && group.first() == Some(&column))
        })
    }
}

impl CabinClass {
    pub fn layout(&self) -> CabinLayout {
        match self {
            CabinClass::First => CabinLayout {
                rows: 4,
                column_groups: FIRST_GROUPS,
            },
            CabinClass::Business => CabinLayout {
                rows: 8,
                column_groups: BUSINESS_GROUPS,
            },
            CabinClass::Economy => CabinLayout {
                rows: 30,
                column_groups: ECONOMY_GROUPS,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CabinClass::Economy => "ECONOMY",
            CabinClass::Business => "BUSINESS",
            CabinClass::First => "FIRST",
        }
    }
}

impl fmt::Display for CabinClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CabinClass {
    type Err = SeatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ECONOMY" => Ok(CabinClass::Economy),
            "BUSINESS" => Ok(CabinClass::Business),
            "FIRST" => Ok(CabinClass::First),
            _ => Err(SeatError::UnknownCabinClass(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Selected,
    Occupied,
    Reserved,
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SeatStatus::Available => "available",
            SeatStatus::Selected => "selected",
            SeatStatus::Occupied => "occupied",
            SeatStatus::Reserved => "reserved",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeatFeature {
    ExtraLegroom,
    Window,
    Aisle,
}

impl SeatFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatFeature::ExtraLegroom => "extra-legroom",
            SeatFeature::Window => "window",
            SeatFeature::Aisle => "aisle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: String,
    pub row: u32,
    pub column: char,
    pub cabin_class: CabinClass,
    pub status: SeatStatus,
    pub surcharge: f64,
    pub features: BTreeSet<SeatFeature>,
}

impl Seat {
    pub fn has_feature(&self, feature: SeatFeature) -> bool {
        self.features.contains(&feature)
    }
}

/// Row-major seats for one cabin.
#[derive(Debug, Clone)]
pub struct SeatMap {
    cabin_class: CabinClass,
    seats: Vec<Seat>,
    index: HashMap<String, usize>,
}

impl SeatMap {
    pub fn generate<R: Rng + ?Sized>(cabin_class: CabinClass, config: &SeatConfig, rng: &mut R) -> Self {
        let layout = cabin_class.layout();
        let mut seats = Vec::with_capacity(layout.capacity());

        for row in 1..=layout.rows {
            let extra_legroom =
                config.extra_legroom_row_interval > 0 && row % config.extra_legroom_row_interval == 0;

            for column in layout.columns() {
                let mut features = BTreeSet::new();
                if extra_legroom {
                    features.insert(SeatFeature::ExtraLegroom);
                }
                if layout.is_window(column) {
                    features.insert(SeatFeature::Window);
                }
                if layout.is_aisle(column) {
                    features.insert(SeatFeature::Aisle);
                }

                // Occupied is drawn first and wins
                let status = if rng.gen::<f64>() < config.occupied_probability {
                    SeatStatus::Occupied
                } else if rng.gen::<f64>() < config.reserved_probability {
                    SeatStatus::Reserved
                } else {
                    SeatStatus::Available
                };

                seats.push(Seat {
                    id: format!("{}{}", row, column),
                    row,
                    column,
                    cabin_class,
                    status,
                    surcharge: if extra_legroom {
                        config.extra_legroom_surcharge
                    } else {
                        0.0
                    },
                    features,
                });
            }
        }

        Self::indexed(cabin_class, seats)
    }

    /// Builds a map from externally supplied seats. Seats must be row-major, one full row
    /// of the cabin layout at a time, with unique ids.
    pub fn from_seats(cabin_class: CabinClass, seats: Vec<Seat>) -> Result<Self, SeatError> {
        if let Some(seat) = seats.iter().find(|s| s.cabin_class != cabin_class) {
            return Err(SeatError::InvalidSeatMap(format!(
                "seat {} belongs to {}, not {}",
                seat.id, seat.cabin_class, cabin_class
            )));
        }

        let per_row = cabin_class.layout().seats_per_row();
        if seats.len() % per_row != 0 {
            return Err(SeatError::InvalidSeatMap(format!(
                "{} seats do not fill rows of {}",
                seats.len(),
                per_row
            )));
        }
        for chunk in seats.chunks(per_row) {
            if chunk.iter().any(|seat| seat.row != chunk[0].row) {
                return Err(SeatError::InvalidSeatMap(format!(
                    "row {} is not contiguous",
                    chunk[0].row
                )));
            }
        }

        let map = Self::indexed(cabin_class, seats);
        if map.index.len() != map.seats.len() {
            let mut seen = HashSet::new();
            let duplicate = map
                .seats
                .iter()
                .map(|seat| normalize_seat_id(&seat.id))
                .find(|id| !seen.insert(id.clone()))
                .unwrap_or_default();
            return Err(SeatError::InvalidSeatMap(format!("duplicate seat id {}", duplicate)));
        }
        Ok(map)
    }

    fn indexed(cabin_class: CabinClass, seats: Vec<Seat>) -> Self {
        let index = seats
            .iter()
            .enumerate()
            .map(|(i, seat)| (normalize_seat_id(&seat.id), i))
            .collect();
        Self {
            cabin_class,
            seats,
            index,
        }
    }

    pub fn cabin_class(&self) -> CabinClass {
        self.cabin_class
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn get(&self, seat_id: &str) -> Option<&Seat> {
        self.position(seat_id).map(|i| &self.seats[i])
    }

    fn position(&self, seat_id: &str) -> Option<usize> {
        self.index.get(&normalize_seat_id(seat_id)).copied()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    // Seats grouped per row, for rendering
    pub fn rows(&self) -> Vec<(u32, &[Seat])> {
        let per_row = self.cabin_class.layout().seats_per_row();
        self.seats
            .chunks(per_row)
            .filter_map(|chunk| chunk.first().map(|seat| (seat.row, chunk)))
            .collect()
    }

    pub fn count_with_status(&self, status: SeatStatus) -> usize {
        self.seats.iter().filter(|s| s.status == status).count()
    }
}

fn normalize_seat_id(seat_id: &str) -> String {
    seat_id.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    Selected,
    Deselected,
}

/// What checkout receives once the selection is complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmedSelection {
    pub cabin_class: CabinClass,
    pub seats: Vec<Seat>,
    pub total_surcharge: f64,
}

pub struct SeatInventory {
    map: SeatMap,
    required_passengers: usize,
    // Indices into the map, in the order the seats were picked
    selected: Vec<usize>,
}

impl SeatInventory {
    pub fn generate(
        cabin_class: CabinClass,
        required_passengers: usize,
        config: &SeatConfig,
    ) -> Result<Self, SeatError> {
        Self::generate_with_rng(
            cabin_class,
            required_passengers,
            config,
            &mut rand::thread_rng(),
        )
    }

    pub fn generate_with_rng<R: Rng + ?Sized>(
        cabin_class: CabinClass,
        required_passengers: usize,
        config: &SeatConfig,
        rng: &mut R,
    ) -> Result<Self, SeatError> {
        let map = SeatMap::generate(cabin_class, config, rng);
        let inventory = Self::with_map(map, required_passengers)?;
        info!(
            cabin = %cabin_class,
            seats = inventory.map.len(),
            available = inventory.map.count_with_status(SeatStatus::Available),
            required_passengers,
            "seat map generated"
        );
        Ok(inventory)
    }

    pub fn with_map(map: SeatMap, required_passengers: usize) -> Result<Self, SeatError> {
        if required_passengers == 0 {
            return Err(SeatError::NoPassengers);
        }
        // Seats arriving pre-selected count toward the limit
        let selected: Vec<usize> = map
            .seats
            .iter()
            .enumerate()
            .filter(|(_, seat)| seat.status == SeatStatus::Selected)
            .map(|(i, _)| i)
            .collect();
        if selected.len() > required_passengers {
            return Err(SeatError::CapacityExceeded {
                limit: required_passengers,
            });
        }
        Ok(Self {
            map,
            required_passengers,
            selected,
        })
    }

    pub fn seat_map(&self) -> &SeatMap {
        &self.map
    }

    pub fn required_passengers(&self) -> usize {
        self.required_passengers
    }

    /// Toggles a seat. Occupied and reserved seats are left untouched.
    pub fn select(&mut self, seat_id: &str) -> Result<SelectionChange, SeatError> {
        let position = self
            .map
            .position(seat_id)
            .ok_or_else(|| SeatError::UnknownSeat(seat_id.to_string()))?;
        let seat = &mut self.map.seats[position];

        match seat.status {
            SeatStatus::Occupied | SeatStatus::Reserved => Err(SeatError::UnavailableSeat {
                seat_id: seat.id.clone(),
                status: seat.status,
            }),
            SeatStatus::Selected => {
                seat.status = SeatStatus::Available;
                self.selected.retain(|&i| i != position);
                debug!(seat = %seat.id, "seat deselected");
                Ok(SelectionChange::Deselected)
            }
            SeatStatus::Available => {
                if self.selected.len() >= self.required_passengers {
                    return Err(SeatError::CapacityExceeded {
                        limit: self.required_passengers,
                    });
                }
                seat.status = SeatStatus::Selected;
                self.selected.push(position);
                debug!(seat = %seat.id, "seat selected");
                Ok(SelectionChange::Selected)
            }
        }
    }

    pub fn selected(&self) -> Vec<&Seat> {
        self.selected.iter().map(|&i| &self.map.seats[i]).collect()
    }

    pub fn selection_count(&self) -> usize {
        self.selected.len()
    }

    pub fn remaining(&self) -> usize {
        self.required_passengers - self.selected.len()
    }

    pub fn total_surcharge(&self) -> f64 {
        self.selected.iter().map(|&i| self.map.seats[i].surcharge).sum()
    }

    pub fn clear_selection(&mut self) {
        for &i in &self.selected {
            self.map.seats[i].status = SeatStatus::Available;
        }
        self.selected.clear();
    }

    /// Succeeds only when exactly one seat per passenger is selected.
    pub fn confirm(&self) -> Result<ConfirmedSelection, SeatError> {
        if self.selected.len() != self.required_passengers {
            return Err(SeatError::IncompleteSelection {
                selected: self.selected.len(),
                required: self.required_passengers,
            });
        }
        let seats: Vec<Seat> = self.selected().into_iter().cloned().collect();
        let total_surcharge = self.total_surcharge();
        info!(
            cabin = %self.map.cabin_class,
            seats = seats.len(),
            total_surcharge,
            "seat selection confirmed"
        );
        Ok(ConfirmedSelection {
            cabin_class: self.map.cabin_class,
            seats,
            total_surcharge,
        })
    }
}
