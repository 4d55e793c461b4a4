//! Customer demand engine.
//!
//! `compute_market_outcome` is pure: the same decisions, snapshots and
//! seed always allocate the same customers. Randomness is used only to
//! order exact ties, drawn from the hour's tie-break stream.
//!
//! Allocation is largest-remainder: every agent gets the floor of its
//! exact share, then leftover customers go one at a time to the largest
//! fractional remainders. The allocation always sums to total demand.

use crate::{
    decision::DecisionRecord,
    error::{SimError, SimResult},
    rng::SeededRng,
    snapshot::{EnvironmentSnapshot, TickSnapshot, Weather},
    store::SimStore,
    timeline::{DayRecord, TickRecord},
    types::{new_id, AgentId, DayNumber, Hour, InsertOutcome, TickId},
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Demand and quality-sensitivity modifiers of a weather category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherModifier {
    pub demand_multiplier:  f64,
    pub quality_importance: f64,
}

pub fn weather_modifier(weather: Weather) -> WeatherModifier {
    let (demand_multiplier, quality_importance) = match weather {
        Weather::Sunny  => (1.2, 1.0),
        Weather::Cloudy => (0.9, 1.1),
        Weather::Rainy  => (0.6, 1.3),
        Weather::Hot    => (1.5, 0.8),
        Weather::Cold   => (0.7, 1.2),
    };
    WeatherModifier {
        demand_multiplier,
        quality_importance,
    }
}

/// Demand multiplier of a day-level special event. Unknown or absent: 1.0.
pub fn event_multiplier(event: Option<&str>) -> f64 {
    match event {
        Some("festival")          => 1.5,
        Some("farmers_market")    => 1.3,
        Some("heat_wave")         => 1.4,
        Some("sports_game")       => 1.6,
        Some("road_construction") => 0.7,
        _                         => 1.0,
    }
}

pub fn price_score(price: f64) -> f64 {
    (2.0 / price).max(0.1)
}

/// Linear in quality around a 0.5 baseline, amplified or damped by weather.
pub fn quality_score(quality: u32, importance: f64) -> f64 {
    0.5 + ((quality as f64 - 1.0) / 9.0) * importance
}

pub fn marketing_score(marketing: u32) -> f64 {
    0.5 + 0.5 * (marketing as f64 / 100.0).sqrt()
}

// ── Inputs and outputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MarketParticipant {
    pub agent_id:  AgentId,
    pub price:     f64,
    pub quality:   u32,
    pub marketing: u32,
}

impl From<&DecisionRecord> for MarketParticipant {
    fn from(d: &DecisionRecord) -> Self {
        Self {
            agent_id:  d.agent_id.clone(),
            price:     d.price,
            quality:   d.quality,
            marketing: d.marketing,
        }
    }
}

/// Every intermediate value behind one agent's allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationFactors {
    pub price:                     f64,
    pub quality:                   u32,
    pub marketing:                 u32,
    pub price_score:               f64,
    pub quality_score:             f64,
    pub marketing_score:           f64,
    pub score:                     f64,
    pub total_score:               f64,
    pub market_share:              f64,
    pub exact_customers:           f64,
    pub floor_customers:           u32,
    pub remainder:                 f64,
    pub remainder_bonus:           u32,
    pub tie_break_key:             u64,
    pub equal_split:               bool,
    pub weather:                   Weather,
    pub weather_demand_multiplier: f64,
    pub quality_importance:        f64,
    pub tick_demand_multiplier:    f64,
    pub special_event:             Option<String>,
    pub event_multiplier:          f64,
    pub base_demand:               u32,
    pub total_demand:              u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentAllocation {
    pub agent_id:  AgentId,
    pub customers: u32,
    pub revenue:   f64,
    pub factors:   AllocationFactors,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketOutcome {
    pub total_demand: u32,
    pub equal_split:  bool,
    pub allocations:  Vec<AgentAllocation>,
}

/// Row from the `customer_event` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerEvent {
    pub event_id:      String,
    pub simulation_id: String,
    pub agent_id:      AgentId,
    pub tick_id:       TickId,
    pub day_number:    DayNumber,
    pub hour:          Hour,
    pub customers:     u32,
    pub sales_volume:  u32,
    pub revenue:       f64,
    pub factors:       AllocationFactors,
}

/// Tick-level digest of a settled market, stored on the tick artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub total_demand:              u32,
    pub total_customers:           u32,
    pub total_revenue:             f64,
    pub participants:              usize,
    pub equal_split:               bool,
    pub weather_demand_multiplier: f64,
    pub tick_demand_multiplier:    f64,
    pub event_multiplier:          f64,
    /// Outcomes that were already persisted by an earlier run of this tick.
    pub reused_events:             usize,
}

// ── Pure computation ─────────────────────────────────────────────────────────

pub fn total_demand(env: &EnvironmentSnapshot, tick: &TickSnapshot) -> u32 {
    let weather = weather_modifier(env.weather);
    let raw = env.base_demand as f64
        * tick.demand_multiplier
        * weather.demand_multiplier
        * event_multiplier(env.special_event.as_deref());
    raw.round().max(0.0) as u32
}

/// Allocate one tick's demand across `participants`.
///
/// `seed` and `hour` select the tie-break stream; they never affect
/// anything but the order of exactly-equal remainders.
pub fn compute_market_outcome(
    participants: &[MarketParticipant],
    env: &EnvironmentSnapshot,
    tick: &TickSnapshot,
    seed: u64,
    hour: Hour,
) -> SimResult<MarketOutcome> {
    if !tick.demand_multiplier.is_finite() || tick.demand_multiplier < 0.0 {
        return Err(SimError::Demand(format!(
            "invalid tick demand multiplier {}",
            tick.demand_multiplier
        )));
    }
    for p in participants {
        if !p.price.is_finite() || p.price <= 0.0 {
            return Err(SimError::Demand(format!(
                "agent {} has invalid price {}",
                p.agent_id, p.price
            )));
        }
    }

    let weather = weather_modifier(env.weather);
    let event_mult = event_multiplier(env.special_event.as_deref());
    let total = total_demand(env, tick);

    let mut rng = SeededRng::for_tie_break(seed, hour);
    // One key per participant in input order, drawn up front so the
    // stream position never depends on the data.
    let keys: Vec<u64> = participants.iter().map(|_| rng.next_u64()).collect();

    let scores: Vec<(f64, f64, f64, f64)> = participants
        .iter()
        .map(|p| {
            let ps = price_score(p.price);
            let qs = quality_score(p.quality, weather.quality_importance);
            let ms = marketing_score(p.marketing);
            (ps, qs, ms, ps * qs * ms)
        })
        .collect();
    let total_score: f64 = scores.iter().map(|s| s.3).sum();
    let equal_split = participants.is_empty() || !(total_score > 0.0 && total_score.is_finite());

    let n = participants.len();
    let mut exact = vec![0.0_f64; n];
    let mut floors = vec![0_u32; n];
    let mut bonus = vec![0_u32; n];

    if n > 0 {
        if equal_split {
            let base = total / n as u32;
            let extra = (total % n as u32) as usize;
            let mut order: Vec<usize> = (0..n).collect();
            rng.shuffle(&mut order);
            for i in 0..n {
                exact[i] = total as f64 / n as f64;
                floors[i] = base;
            }
            for &i in order.iter().take(extra) {
                bonus[i] = 1;
            }
        } else {
            for i in 0..n {
                exact[i] = scores[i].3 / total_score * total as f64;
                floors[i] = exact[i].floor() as u32;
            }
            let allocated: u32 = floors.iter().sum();
            let mut leftover = total.saturating_sub(allocated);

            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|&a, &b| {
                let ra = exact[a] - floors[a] as f64;
                let rb = exact[b] - floors[b] as f64;
                rb.partial_cmp(&ra)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| keys[b].cmp(&keys[a]))
                    .then_with(|| a.cmp(&b))
            });
            // Leftover is below n in practice; cycling covers float drift.
            while leftover > 0 {
                for &i in &order {
                    if leftover == 0 {
                        break;
                    }
                    bonus[i] += 1;
                    leftover -= 1;
                }
            }
        }
    }

    let allocations = participants
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let customers = floors[i] + bonus[i];
            let (ps, qs, ms, score) = scores[i];
            AgentAllocation {
                agent_id: p.agent_id.clone(),
                customers,
                revenue: round2(customers as f64 * p.price),
                factors: AllocationFactors {
                    price: p.price,
                    quality: p.quality,
                    marketing: p.marketing,
                    price_score: ps,
                    quality_score: qs,
                    marketing_score: ms,
                    score,
                    total_score,
                    market_share: if equal_split { 1.0 / n as f64 } else { score / total_score },
                    exact_customers: exact[i],
                    floor_customers: floors[i],
                    remainder: exact[i] - floors[i] as f64,
                    remainder_bonus: bonus[i],
                    tie_break_key: keys[i],
                    equal_split,
                    weather: env.weather,
                    weather_demand_multiplier: weather.demand_multiplier,
                    quality_importance: weather.quality_importance,
                    tick_demand_multiplier: tick.demand_multiplier,
                    special_event: env.special_event.clone(),
                    event_multiplier: event_mult,
                    base_demand: env.base_demand,
                    total_demand: total,
                },
            }
        })
        .collect();

    Ok(MarketOutcome {
        total_demand: total,
        equal_split,
        allocations,
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ── Settlement ───────────────────────────────────────────────────────────────

/// Result of settling one tick's market. Never an `Err`: a failed
/// computation or write is reported in `error` and yields no events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSettlement {
    pub events:    Vec<CustomerEvent>,
    pub summary:   Option<MarketSummary>,
    pub error:     Option<String>,
    /// Agents holding a decision that the persisted outcome leaves out.
    pub unsettled: Vec<AgentId>,
}

/// Compute and persist the outcome of one tick.
///
/// Writes are insert-or-ignore keyed by (simulation, agent, day, hour);
/// an outcome already on disk is read back and kept as is.
///
/// Persisted rows are only completed with fresh allocations when they
/// agree with an allocation over the same decisions. If the tick was
/// settled over a different set of agents, the persisted rows stand
/// alone and the extra agents are reported in `unsettled`, so the
/// tick's customers still sum to its total demand.
pub fn settle_market(
    store: &SimStore,
    day: &DayRecord,
    tick: &TickRecord,
    decisions: &[DecisionRecord],
) -> MarketSettlement {
    match try_settle(store, day, tick, decisions) {
        Ok(settlement) => settlement,
        Err(e) => {
            log::warn!(
                "day={} hour={} demand: market settlement failed: {e}",
                tick.day_number,
                tick.hour
            );
            MarketSettlement {
                error: Some(e.to_string()),
                ..MarketSettlement::default()
            }
        }
    }
}

fn try_settle(
    store: &SimStore,
    day: &DayRecord,
    tick: &TickRecord,
    decisions: &[DecisionRecord],
) -> SimResult<MarketSettlement> {
    let settled = store.customer_events_for_tick(&tick.tick_id)?;
    let participants: Vec<MarketParticipant> = decisions.iter().map(MarketParticipant::from).collect();
    let outcome = match compute_market_outcome(
        &participants,
        &day.environment,
        &tick.snapshot,
        day.seed,
        tick.hour,
    ) {
        Ok(o) => o,
        Err(e) if settled.is_empty() => return Err(e),
        Err(_) => return Ok(keep_settled(tick, decisions, settled)),
    };
    let consistent = settled.iter().all(|e| {
        outcome
            .allocations
            .iter()
            .any(|a| a.agent_id == e.agent_id && a.customers == e.customers)
    });
    if !consistent {
        return Ok(keep_settled(tick, decisions, settled));
    }

    let mut events = Vec::with_capacity(outcome.allocations.len());
    let mut reused = 0;
    for alloc in outcome.allocations {
        let candidate = CustomerEvent {
            event_id: new_id(),
            simulation_id: tick.simulation_id.clone(),
            agent_id: alloc.agent_id,
            tick_id: tick.tick_id.clone(),
            day_number: tick.day_number,
            hour: tick.hour,
            customers: alloc.customers,
            sales_volume: alloc.customers,
            revenue: alloc.revenue,
            factors: alloc.factors,
        };
        match store.insert_customer_event_if_absent(&candidate)? {
            InsertOutcome::Inserted => events.push(candidate),
            InsertOutcome::Existing => {
                reused += 1;
                let existing = store
                    .customer_event_for(
                        &candidate.simulation_id,
                        &candidate.agent_id,
                        candidate.day_number,
                        candidate.hour,
                    )?
                    .ok_or_else(|| SimError::not_found("customer_event", &candidate.agent_id))?;
                events.push(existing);
            }
        }
    }

    let env = &day.environment;
    let summary = MarketSummary {
        total_demand: outcome.total_demand,
        total_customers: events.iter().map(|e| e.customers).sum(),
        total_revenue: round2(events.iter().map(|e| e.revenue).sum()),
        participants: events.len(),
        equal_split: outcome.equal_split,
        weather_demand_multiplier: weather_modifier(env.weather).demand_multiplier,
        tick_demand_multiplier: tick.snapshot.demand_multiplier,
        event_multiplier: event_multiplier(env.special_event.as_deref()),
        reused_events: reused,
    };
    log::debug!(
        "day={} hour={} demand: {} customers across {} stands",
        tick.day_number,
        tick.hour,
        summary.total_customers,
        summary.participants
    );
    Ok(MarketSettlement {
        events,
        summary: Some(summary),
        error: None,
        unsettled: Vec::new(),
    })
}

/// The persisted outcome of a tick settled over a different agent set.
fn keep_settled(tick: &TickRecord, decisions: &[DecisionRecord], settled: Vec<CustomerEvent>) -> MarketSettlement {
    let unsettled: Vec<AgentId> = decisions
        .iter()
        .filter(|d| !settled.iter().any(|e| e.agent_id == d.agent_id))
        .map(|d| d.agent_id.clone())
        .collect();
    let error = (!unsettled.is_empty()).then(|| {
        format!(
            "tick already settled without {}; no customers allocated to them",
            unsettled.join(", ")
        )
    });
    if let Some(e) = &error {
        log::warn!("day={} hour={} demand: {e}", tick.day_number, tick.hour);
    }

    // Every persisted row carries the tick-level factors it was allocated with.
    let factors = &settled[0].factors;
    let summary = MarketSummary {
        total_demand: factors.total_demand,
        total_customers: settled.iter().map(|e| e.customers).sum(),
        total_revenue: round2(settled.iter().map(|e| e.revenue).sum()),
        participants: settled.len(),
        equal_split: factors.equal_split,
        weather_demand_multiplier: factors.weather_demand_multiplier,
        tick_demand_multiplier: factors.tick_demand_multiplier,
        event_multiplier: factors.event_multiplier,
        reused_events: settled.len(),
    };
    MarketSettlement {
        events: settled,
        summary: Some(summary),
        error,
        unsettled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sunny_100() -> (EnvironmentSnapshot, TickSnapshot) {
        (
            EnvironmentSnapshot {
                weather: Weather::Sunny,
                temperature: 82,
                base_demand: 100,
                special_event: None,
            },
            TickSnapshot {
                demand_multiplier: 1.0,
                event: None,
            },
        )
    }

    fn participant(id: &str, price: f64, quality: u32, marketing: u32) -> MarketParticipant {
        MarketParticipant {
            agent_id: id.into(),
            price,
            quality,
            marketing,
        }
    }

    #[test]
    fn two_stand_sunny_scenario() {
        let (env, tick) = sunny_100();
        let out = compute_market_outcome(
            &[participant("a", 1.00, 10, 100), participant("b", 2.00, 1, 0)],
            &env,
            &tick,
            7,
            12,
        )
        .unwrap();

        assert_eq!(out.total_demand, 120);
        let a = &out.allocations[0];
        let b = &out.allocations[1];
        assert_eq!(a.factors.price_score, 2.0);
        assert_eq!(a.factors.quality_score, 1.5);
        assert_eq!(a.factors.marketing_score, 1.0);
        assert_eq!(a.factors.score, 3.0);
        assert_eq!(b.factors.score, 0.25);
        assert_eq!(a.customers, 111);
        assert_eq!(b.customers, 9);
        assert_eq!(a.revenue, 111.0);
        assert_eq!(b.revenue, 18.0);
    }

    #[test]
    fn identical_stands_split_remainder_by_seed() {
        let (env, mut tick) = sunny_100();
        tick.demand_multiplier = 0.84; // 100 * 0.84 * 1.2 = 100.8 -> 101
        let stands = [
            participant("a", 2.0, 5, 50),
            participant("b", 2.0, 5, 50),
            participant("c", 2.0, 5, 50),
        ];
        let first = compute_market_outcome(&stands, &env, &tick, 99, 10).unwrap();
        let again = compute_market_outcome(&stands, &env, &tick, 99, 10).unwrap();
        assert_eq!(first, again);

        let counts: Vec<u32> = first.allocations.iter().map(|a| a.customers).collect();
        assert_eq!(counts.iter().sum::<u32>(), 101);
        assert_eq!(counts.iter().filter(|&&c| c == 34).count(), 2);
        assert_eq!(counts.iter().filter(|&&c| c == 33).count(), 1);
    }

    #[test]
    fn special_event_scales_demand() {
        let (mut env, tick) = sunny_100();
        env.special_event = Some("festival".into());
        assert_eq!(total_demand(&env, &tick), 180);
        env.special_event = Some("unknown_parade".into());
        assert_eq!(total_demand(&env, &tick), 120);
    }

    #[test]
    fn price_score_is_floored() {
        assert_eq!(price_score(10.0), 0.2);
        assert_eq!(price_score(40.0), 0.1);
    }

    #[test]
    fn invalid_price_is_a_demand_error() {
        let (env, tick) = sunny_100();
        let err = compute_market_outcome(&[participant("a", 0.0, 5, 5)], &env, &tick, 1, 9).unwrap_err();
        assert!(matches!(err, SimError::Demand(_)));
    }

    #[test]
    fn no_participants_allocates_nothing() {
        let (env, tick) = sunny_100();
        let out = compute_market_outcome(&[], &env, &tick, 1, 9).unwrap();
        assert_eq!(out.total_demand, 120);
        assert!(out.allocations.is_empty());
    }
}
