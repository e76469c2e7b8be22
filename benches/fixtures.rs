use chrono::NaiveDate;

use chama::config::SimulationConfig;
use chama::model::{Group, GroupTerms, InterestType, NewMember};
use chama::roles::Role;
use chama::simulation::Simulation;
use chama::store::{MemoryStore, Store};
use chama::types::UserId;

pub struct Scenario {
    pub members: usize,
    pub months: u32,
}

pub const SMALL: Scenario = Scenario { members: 10, months: 6 };

pub const MEDIUM: Scenario = Scenario { members: 50, months: 12 };

pub const LARGE: Scenario = Scenario { members: 250, months: 24 };

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn terms() -> GroupTerms {
    GroupTerms {
        monthly_contribution: 10_000,
        penalty_amount: 1_000,
        contribution_due_day: 10,
        interest_rate: 10.0,
        loan_interest_type: InterestType::ReducingBalance,
        max_loan_multiplier: 3.0,
        min_loan_amount: 5_000,
        cycle_end_date: None,
    }
}

/// A group with `members` active members and no contributions, so every
/// member is due a missed-month penalty on the first check.
pub fn seeded_group(members: usize) -> (MemoryStore, Group) {
    let store = MemoryStore::new();
    let group = store.insert_group("Bench Circle", &terms()).unwrap();
    for i in 0..members {
        store
            .insert_member(&NewMember {
                group_id: group.id,
                user_id: UserId(i as u64 + 1),
                name: format!("member-{i}"),
                role: Role::Member,
                joined_on: day(2025, 1, 1),
            })
            .unwrap()
            .unwrap();
    }
    (store, group)
}

/// A started simulation over the canonical config, ready to run.
pub fn build_simulation(scenario: &Scenario, seed: u64) -> Simulation<MemoryStore> {
    let mut config = SimulationConfig::canonical();
    config.seed = seed;
    config.members = scenario.members;
    config.months = scenario.months;
    config.group.cycle_end_date = None;
    let mut sim = Simulation::from_config(config);
    sim.start().unwrap();
    sim
}
