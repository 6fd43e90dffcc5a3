use chrono::{Duration, Utc};
use clap::Args;
use std::sync::Arc;

use crate::infra::build_engine;
use screenmatch::config::MatchingConfig;
use screenmatch::error::AppError;
use screenmatch::matching::{
    Campaign, CampaignId, CampaignStatus, DonorId, InMemoryLedger, LedgerError, MatchLedger,
    MatchTrigger, PatientId, ScreeningTypeId, WaitlistEntry,
};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Patients to enqueue per screening type
    #[arg(long, default_value_t = 3)]
    pub(crate) patients: u32,
    /// Campaign budget in minor currency units
    #[arg(long, default_value_t = 500)]
    pub(crate) budget: u32,
}

/// Walk one allocation lifecycle end to end on a throwaway ledger: seed
/// demand and funding, run a cycle, claim one allocation, let the rest
/// expire, and show that every debit is accounted for.
pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { patients, budget } = args;

    let config = MatchingConfig::default();
    let cost = config.default_screening_cost;
    let claim_ttl = config.claim_ttl;
    let (engine, ledger) = build_engine(config);

    println!("Waitlist matching demo");
    println!(
        "- {} patients per screening type | campaign budget {} | screening cost {}",
        patients, budget, cost
    );

    let start = Utc::now();
    let mammogram = ScreeningTypeId("mammogram".to_string());
    let colonoscopy = ScreeningTypeId("colonoscopy".to_string());

    let campaigns = vec![
        seed_campaign(&ledger, "spring-drive", budget, &mammogram, start)?,
        seed_campaign(&ledger, "autumn-drive", budget, &colonoscopy, start)?,
    ];

    let mut joined: Vec<WaitlistEntry> = Vec::new();
    for index in 0..patients {
        for screening_type in [&mammogram, &colonoscopy] {
            let patient = PatientId(format!("patient-{}-{}", screening_type.0, index));
            let joined_at = start + Duration::minutes(i64::from(index));
            let entry = engine
                .join_waitlist_at(patient, screening_type.clone(), joined_at)
                .map_err(AppError::Engine)?;
            joined.push(entry);
        }
    }

    let trigger = MatchTrigger::Manual {
        admin_id: "demo-admin".to_string(),
    };
    let cycle_start = start + Duration::minutes(30);
    let record = engine
        .run_cycle_at(trigger, cycle_start)
        .map_err(AppError::Engine)?;
    println!("\nFirst matching cycle ({})", record.triggered_by.describe());
    println!(
        "- matched {} | expired {} | errors: {}",
        record.matched_count,
        record.expired_count,
        record.error_summary.as_deref().unwrap_or("none")
    );

    // One patient follows through; the rest sit on their allocations until
    // the claim window closes.
    for entry in &joined {
        if let Some(allocation) = ledger.live_allocation_for(&entry.id).map_err(wrap_ledger)? {
            let claimed = engine
                .claim_at(&allocation.id, cycle_start + Duration::hours(1))
                .map_err(AppError::Engine)?;
            println!(
                "- allocation {} claimed by {}",
                claimed.id.0, entry.patient_id.0
            );
            break;
        }
    }

    let past_deadline = cycle_start + claim_ttl + Duration::minutes(1);
    let rerun = engine
        .run_cycle_at(MatchTrigger::Scheduled, past_deadline)
        .map_err(AppError::Engine)?;
    println!("\nSecond cycle after the claim window closed");
    println!(
        "- matched {} | expired {} (unclaimed allocations returned to the queue)",
        rerun.matched_count, rerun.expired_count
    );

    let stats = engine.stats().map_err(AppError::Engine)?;
    println!("\nLedger after both cycles");
    println!(
        "- pending {} | matched {} | campaigns active {}/{}",
        stats.pending, stats.matched, stats.campaigns_active, stats.campaigns_total
    );
    for demand in engine.demand_summary().map_err(AppError::Engine)? {
        println!(
            "- demand: {} patients waiting for {}",
            demand.pending, demand.screening_type_id.0
        );
    }

    let mut remaining = 0u32;
    for campaign in &campaigns {
        let stored = ledger
            .fetch_campaign(&campaign.id)
            .map_err(wrap_ledger)?
            .ok_or_else(|| wrap_ledger(LedgerError::NotFound))?;
        println!(
            "- campaign {}: {} of {} remaining ({})",
            stored.title,
            stored.remaining_budget,
            budget,
            stored.status.label()
        );
        remaining += stored.remaining_budget;
    }

    // Live allocations (the claim plus anything still awaiting one) account
    // for every unit missing from the seeded budgets.
    let mut outstanding = 0u32;
    for entry in &joined {
        if let Some(allocation) = ledger.live_allocation_for(&entry.id).map_err(wrap_ledger)? {
            outstanding += allocation.cost;
        }
    }
    println!(
        "- conservation: {} remaining + {} allocated = {} seeded",
        remaining,
        outstanding,
        2 * budget
    );

    println!("\nRun history (newest first)");
    for run in engine.recent_runs(10).map_err(AppError::Engine)? {
        println!(
            "- {}: matched {} expired {}",
            run.triggered_by.describe(),
            run.matched_count,
            run.expired_count
        );
    }

    Ok(())
}

fn seed_campaign(
    ledger: &Arc<InMemoryLedger>,
    title: &str,
    budget: u32,
    screening_type: &ScreeningTypeId,
    created_at: chrono::DateTime<Utc>,
) -> Result<Campaign, AppError> {
    let campaign = Campaign {
        id: CampaignId::generate(),
        donor_id: DonorId(format!("donor-{title}")),
        title: title.to_string(),
        funded_screenings: vec![screening_type.clone()],
        status: CampaignStatus::Active,
        remaining_budget: budget,
        created_at,
    };
    ledger.insert_campaign(campaign).map_err(wrap_ledger)
}

fn wrap_ledger(err: LedgerError) -> AppError {
    AppError::Engine(err.into())
}
