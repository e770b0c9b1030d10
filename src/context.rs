// Session context owned by the application shell.
// Wires the rate cache, converter and draft store over one store and clock, and remembers the chosen currency.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::conversion::ConversionService;
use crate::currency::{CurrencyProfile, USD};
use crate::draft_store::DraftStore;
use crate::provider::RateProvider;
use crate::rate_cache::{Freshness, RateCache};
use crate::storage::{KvStore, Snapshot, StorageError};

pub const CURRENCY_SELECTION_KEY: &str = "session:currency";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Failed to serialize currency selection: {0}")]
    SerializeError(String),

    #[error("Failed to persist currency selection: {0}")]
    StorageError(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CurrencySelection {
    code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
}

/// State recovered by [`SessionContext::restore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestoredSession {
    pub currency: CurrencyProfile,
    pub rates: Freshness,
}

pub struct SessionContext {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    conversion: ConversionService,
    drafts: DraftStore,
    currency: CurrencyProfile,
}

impl SessionContext {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn KvStore>,
        provider: Arc<dyn RateProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rates = RateCache::new(&config.rates, store.clone(), provider, clock.clone());
        let drafts = DraftStore::new(&config.drafts, store.clone(), clock.clone());
        Self {
            store,
            clock,
            conversion: ConversionService::new(rates),
            drafts,
            currency: USD,
        }
    }

    /// Loads the rate snapshot and the persisted currency choice.
    /// A stale rate table is revalidated in the background when a runtime is available.
    pub fn restore(&mut self) -> RestoredSession {
        let rates = self.rates().load();
        if rates == Freshness::Stale {
            self.rates().spawn_refresh();
        }

        self.currency = self.load_selection().unwrap_or(USD);
        info!(currency = self.currency.code, ?rates, "session restored");
        RestoredSession {
            currency: self.currency,
            rates,
        }
    }

    fn load_selection(&self) -> Option<CurrencyProfile> {
        let raw = self.store.get(CURRENCY_SELECTION_KEY)?;
        let profile = serde_json::from_str::<Snapshot<CurrencySelection>>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|snapshot| {
                CurrencyProfile::by_code(&snapshot.data.code)
                    .ok_or_else(|| format!("unsupported currency {}", snapshot.data.code))
            });

        match profile {
            Ok(profile) => Some(profile),
            Err(reason) => {
                warn!(key = CURRENCY_SELECTION_KEY, %reason, "discarding corrupt currency selection");
                if let Err(e) = self.store.delete(CURRENCY_SELECTION_KEY) {
                    warn!(key = CURRENCY_SELECTION_KEY, error = %e, "failed to delete currency selection");
                }
                None
            }
        }
    }

    fn persist_selection(&self, selection: &CurrencySelection) -> Result<(), SessionError> {
        let snapshot = Snapshot {
            data: selection,
            timestamp: self.clock.now_millis(),
        };
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| SessionError::SerializeError(e.to_string()))?;
        self.store.set(CURRENCY_SELECTION_KEY, json)?;
        Ok(())
    }

    pub fn select_currency(&mut self, code: &str) -> Result<CurrencyProfile, SessionError> {
        let profile = CurrencyProfile::by_code(code)
            .ok_or_else(|| SessionError::UnsupportedCurrency(code.to_string()))?;
        self.persist_selection(&CurrencySelection {
            code: profile.code.to_string(),
            country: None,
        })?;
        self.currency = profile;
        debug!(currency = profile.code, "currency selected");
        Ok(profile)
    }

    /// Countries without a dedicated profile are priced in USD.
    pub fn select_country(&mut self, country: &str) -> Result<CurrencyProfile, SessionError> {
        let profile = CurrencyProfile::for_country(country);
        self.persist_selection(&CurrencySelection {
            code: profile.code.to_string(),
            country: Some(country.trim().to_uppercase()),
        })?;
        self.currency = profile;
        debug!(country, currency = profile.code, "country selected");
        Ok(profile)
    }

    pub fn currency(&self) -> CurrencyProfile {
        self.currency
    }

    /// Converts an amount quoted in the base currency into the selected currency.
    pub fn convert_price(&self, amount_in_base: f64) -> f64 {
        self.conversion
            .convert(amount_in_base, self.rates().base_currency(), self.currency.code)
    }

    pub fn display_price(&self, amount_in_base: f64) -> String {
        self.conversion.convert_and_format(
            amount_in_base,
            self.rates().base_currency(),
            &self.currency,
        )
    }

    pub fn rates(&self) -> &RateCache {
        self.conversion.rates()
    }

    pub fn conversion(&self) -> &ConversionService {
        &self.conversion
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }
}
