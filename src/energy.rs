use crate::clock::Date;
use crate::entities::Numeric;
use crate::prelude::*;
use crate::store::Store;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Stores the last calendar date seen, as yyyymmdd, so a restart on a new
/// day still rolls the counters over.
pub const DATE_KEY: &str = "energy_last_date";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// PV charging power
    Solar,
    /// AC output active power
    Inverter,
}

/// kWh accumulated over each period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub today: f64,
    pub month: f64,
    pub year: f64,
    pub total: f64,
}

impl Totals {
    fn add(&mut self, kwh: f64) {
        self.today += kwh;
        self.month += kwh;
        self.year += kwh;
        self.total += kwh;
    }
}

fn keys(channel: Channel) -> [Numeric; 4] {
    match channel {
        Channel::Solar => [
            Numeric::SolarEnergyToday,
            Numeric::SolarEnergyMonth,
            Numeric::SolarEnergyYear,
            Numeric::SolarEnergyTotal,
        ],
        Channel::Inverter => [
            Numeric::InverterEnergyToday,
            Numeric::InverterEnergyMonth,
            Numeric::InverterEnergyYear,
            Numeric::InverterEnergyTotal,
        ],
    }
}

fn encode_date(date: Date) -> f64 {
    (date.year as f64) * 10_000.0 + (date.month as f64) * 100.0 + date.day as f64
}

fn decode_date(value: f64) -> Option<Date> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let value = value as i64;
    Some(Date {
        day: (value % 100) as u32,
        month: ((value / 100) % 100) as u32,
        year: (value / 10_000) as i32,
    })
}

/// Integrates two power readings into energy counters with day, month and
/// year rollover.
#[derive(Debug, Clone)]
pub struct EnergyIntegrator {
    sample_interval_ms: u64,
    save_interval_ms: u64,
    solar: Totals,
    inverter: Totals,
    last_date: Option<Date>,
    last_tick_ms: Option<u64>,
    // baseline for the next integration step; None until the first sample
    last_sample_ms: Option<u64>,
    last_save_ms: u64,
}

impl EnergyIntegrator {
    pub fn new(sample_interval_ms: u64, save_interval_ms: u64) -> Self {
        Self {
            sample_interval_ms,
            save_interval_ms,
            solar: Totals::default(),
            inverter: Totals::default(),
            last_date: None,
            last_tick_ms: None,
            last_sample_ms: None,
            last_save_ms: 0,
        }
    }

    pub fn totals(&self, channel: Channel) -> Totals {
        match channel {
            Channel::Solar => self.solar,
            Channel::Inverter => self.inverter,
        }
    }

    fn totals_mut(&mut self, channel: Channel) -> &mut Totals {
        match channel {
            Channel::Solar => &mut self.solar,
            Channel::Inverter => &mut self.inverter,
        }
    }

    pub fn baseline_established(&self) -> bool {
        self.last_sample_ms.is_some()
    }

    /// All eight counters keyed by entity, for publishing.
    pub fn values(&self) -> Vec<(Numeric, f64)> {
        [Channel::Solar, Channel::Inverter]
            .into_iter()
            .flat_map(|channel| {
                let t = self.totals(channel);
                keys(channel)
                    .into_iter()
                    .zip([t.today, t.month, t.year, t.total])
            })
            .collect()
    }

    /// Restore counters from the store. Missing keys count as zero.
    pub fn load(&mut self, store: &dyn Store) {
        for channel in [Channel::Solar, Channel::Inverter] {
            let [today, month, year, total] = keys(channel).map(|k| store.load(k.key()).unwrap_or(0.0));
            *self.totals_mut(channel) = Totals {
                today,
                month,
                year,
                total,
            };
        }
        self.last_date = store.load(DATE_KEY).and_then(decode_date);

        info!(
            "loaded energy totals: solar {:.2} kWh, inverter {:.2} kWh",
            self.solar.total, self.inverter.total
        );
    }

    pub fn save(&self, store: &mut dyn Store) -> Result<()> {
        for (key, value) in self.values() {
            store.save(key.key(), value)?;
        }
        if let Some(date) = self.last_date {
            store.save(DATE_KEY, encode_date(date))?;
        }
        store.commit()?;

        debug!(
            "saved energy totals: solar {:.3}/{:.3}/{:.3}, inverter {:.3}/{:.3}/{:.3}",
            self.solar.today,
            self.solar.month,
            self.solar.year,
            self.inverter.today,
            self.inverter.month,
            self.inverter.year
        );
        Ok(())
    }

    fn roll_over(&mut self, date: Date) {
        let Some(last) = self.last_date.replace(date) else {
            return;
        };

        if date.day != last.day {
            info!("new day, resetting today's energy");
            self.solar.today = 0.0;
            self.inverter.today = 0.0;
        }
        if date.month != last.month {
            info!("new month, resetting this month's energy");
            self.solar.month = 0.0;
            self.inverter.month = 0.0;
        }
        if date.year != last.year {
            info!("new year, resetting this year's energy");
            self.solar.year = 0.0;
            self.inverter.year = 0.0;
        }
    }

    /// Run one sample if the sampling period has passed. Returns true if a
    /// sample was taken, meaning the counters may have changed.
    ///
    /// Power readings that are missing, negative, infinite or not a number
    /// are left out of the integration.
    pub fn tick(
        &mut self,
        now_ms: u64,
        today: Option<Date>,
        solar_watts: Option<f32>,
        inverter_watts: Option<f32>,
    ) -> bool {
        if let Some(last) = self.last_tick_ms {
            if now_ms.saturating_sub(last) < self.sample_interval_ms {
                return false;
            }
        }
        self.last_tick_ms = Some(now_ms);

        if let Some(date) = today {
            self.roll_over(date);
        }

        let Some(last_sample) = self.last_sample_ms.replace(now_ms) else {
            return true;
        };
        let hours = now_ms.saturating_sub(last_sample) as f64 / MS_PER_HOUR;

        for (channel, watts) in [(Channel::Solar, solar_watts), (Channel::Inverter, inverter_watts)] {
            match watts {
                Some(w) if w.is_finite() && w >= 0.0 => {
                    let kwh = w as f64 / 1000.0 * hours;
                    self.totals_mut(channel).add(kwh);
                }
                _ => {}
            }
        }

        true
    }

    pub fn save_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_save_ms) >= self.save_interval_ms
    }

    pub fn mark_saved(&mut self, now_ms: u64) {
        self.last_save_ms = now_ms;
    }
}
