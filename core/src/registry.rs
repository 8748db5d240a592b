//! Keyed registry of circuit breakers, one per protected dependency
//!
//! Breakers in a registry share a clock and nothing else: each owns its
//! own window, state and counters.

use crate::{
    callbacks::Callbacks,
    circuit::CircuitBreaker,
    clock::{Clock, MonotonicClock},
    config::{BreakerSettings, Config},
    errors::{ConfigError, RegistryError},
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    #[serde(default)]
    defaults: BreakerSettings,
    #[serde(default)]
    breakers: HashMap<String, BreakerSettings>,
}

/// Mapping from dependency name to its circuit breaker
///
/// # Example
///
/// ```rust
/// use callguard::BreakerRegistry;
///
/// let registry = BreakerRegistry::from_toml_str(
///     r#"
///     [defaults]
///     sliding_window_size = 20
///     minimum_calls = 10
///
///     [breakers.payment_api]
///     failure_rate_threshold = 25.0
///     wait_duration_in_open_secs = 10.0
///     "#,
/// )
/// .unwrap();
///
/// let payments = registry.get_or_create("payment_api");
/// assert_eq!(payments.config().failure_rate_threshold, 25.0);
///
/// // Names without an entry fall back to the defaults
/// let search = registry.get_or_create("search");
/// assert_eq!(search.config().sliding_window_size, 20);
/// ```
pub struct BreakerRegistry {
    defaults: Config,
    overrides: HashMap<String, Config>,
    clock: Arc<dyn Clock>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create an empty registry whose lazily created breakers use `defaults`
    pub fn new(defaults: Config) -> Result<Self, ConfigError> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            overrides: HashMap::new(),
            clock: Arc::new(MonotonicClock::new()),
            breakers: RwLock::new(HashMap::new()),
        })
    }

    /// Build a registry from a TOML document with `[defaults]` and
    /// `[breakers.<name>]` tables
    ///
    /// Every entry is validated here, so lazy creation later cannot fail.
    pub fn from_toml_str(source: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(source)?;

        let defaults = file
            .defaults
            .apply(&Config::default())
            .map_err(RegistryError::InvalidDefaults)?;

        let mut overrides = HashMap::with_capacity(file.breakers.len());
        for (name, settings) in file.breakers {
            match settings.apply(&defaults) {
                Ok(config) => {
                    overrides.insert(name, config);
                }
                Err(source) => return Err(RegistryError::InvalidBreaker { name, source }),
            }
        }

        let mut registry = Self::new(defaults).map_err(RegistryError::InvalidDefaults)?;
        registry.overrides = overrides;
        Ok(registry)
    }

    /// Use `clock` for every breaker this registry creates
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Eagerly create (or replace) the breaker for `name`
    pub fn register(
        &self,
        name: impl Into<String>,
        config: Config,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        let name = name.into();
        let breaker = CircuitBreaker::builder(name.clone())
            .config(config)
            .clock(self.clock.clone())
            .build()?;

        Ok(self.insert(breaker))
    }

    /// Add a breaker built elsewhere, e.g. one carrying callbacks
    pub fn insert(&self, breaker: CircuitBreaker) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(breaker);
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        breakers.insert(breaker.name().to_string(), breaker.clone());
        debug!(circuit = %breaker.name(), "breaker registered");
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        breakers.get(name).cloned()
    }

    /// Return the breaker for `name`, creating it on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(name) {
            return breaker;
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.defaults.clone());
                debug!(circuit = %name, "breaker created on first use");
                Arc::new(CircuitBreaker::assemble(
                    name.to_string(),
                    config,
                    self.clock.clone(),
                    None,
                    Callbacks::new(),
                ))
            })
            .clone()
    }

    /// Registered breaker names, sorted
    pub fn names(&self) -> Vec<String> {
        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configuration used for names without their own entry
    pub fn defaults(&self) -> &Config {
        &self.defaults
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self {
            defaults: Config::default(),
            overrides: HashMap::new(),
            clock: Arc::new(MonotonicClock::new()),
            breakers: RwLock::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("defaults", &self.defaults)
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .field("breakers", &self.names())
            .finish()
    }
}
