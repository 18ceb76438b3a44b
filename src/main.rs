use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{info, warn};

use clinic_queue::analytics::priority_counts;
use clinic_queue::clock::{ManualClock, SystemClock};
use clinic_queue::config::AppConfig;
use clinic_queue::display::{print_clinic_counters, print_queue_snapshot};
use clinic_queue::export::export_check_ins_to_file;
use clinic_queue::queue::{CheckInRequest, CheckInStatus, LocationProof, Priority};
use clinic_queue::store::{load_clinics, Clinic, PatientInfo};
use clinic_queue::web::{self, AppState};

fn demo_clinic() -> Clinic {
    Clinic {
        clinic_id: "demo".to_string(),
        name: "Demo Walk-In Clinic".to_string(),
        is_active: true,
        max_queue_size: 20,
        avg_wait_minutes: 15,
        geofence: None,
    }
}

fn load_directory(config: &AppConfig) -> Result<Vec<Clinic>, Box<dyn std::error::Error>> {
    if config.clinics_csv.exists() {
        Ok(load_clinics(&config.clinics_csv)?)
    } else {
        warn!(
            "Clinic directory {} not found, using a single demo clinic",
            config.clinics_csv.display()
        );
        Ok(vec![demo_clinic()])
    }
}

/// Walks one clinic through a morning of arrivals, calls and departures
fn run_demo(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let clinics = load_directory(config)?;
    let clinic = clinics
        .iter()
        .find(|c| c.is_active)
        .cloned()
        .ok_or("No active clinic in the directory")?;

    // open the clinic at 08:00 local time today
    let opening = Utc::now()
        .with_timezone(&config.utc_offset)
        .date_naive()
        .and_hms_opt(8, 0, 0)
        .and_then(|t| t.and_local_timezone(config.utc_offset).single())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(opening));
    let state = AppState::in_memory(clinics, config, clock.clone());
    let engine = &state.engine;

    let arrivals = [
        ("Ada", "Lovelace", "Persistent cough", Priority::Normal),
        ("Grace", "Hopper", "Follow-up on blood test", Priority::Low),
        ("Alan", "Turing", "Chest pain", Priority::Emergency),
        ("Edsger", "Dijkstra", "Sprained wrist", Priority::High),
        ("Barbara", "Liskov", "Ear infection", Priority::Normal),
        ("Donald", "Knuth", "Prescription renewal", Priority::Low),
    ];

    println!("Checking in {} patients at {}...", arrivals.len(), clinic.name);
    let mut check_ins = Vec::new();
    for (first, last, reason, priority) in arrivals {
        let patient = state.patients.resolve(
            &PatientInfo {
                first_name: Some(first.to_string()),
                last_name: Some(last.to_string()),
                ..PatientInfo::default()
            },
            engine.now(),
        )?;
        let location = clinic.geofence.map(|fence| LocationProof {
            latitude: fence.latitude,
            longitude: fence.longitude,
            accuracy: Some(10.0),
        });
        let entry = engine.check_in(CheckInRequest {
            clinic_id: clinic.clinic_id.clone(),
            patient_id: patient.patient_id.clone(),
            visit_reason: reason.to_string(),
            priority,
            location,
        })?;
        println!(
            "  {} checked in at position {} (~{} min)",
            patient.display_name(),
            entry.queue_position,
            entry.estimated_wait_minutes
        );
        check_ins.push(entry);
        clock.advance(Duration::minutes(4));
    }

    println!("\n=== Running the morning ===");
    let first = engine.call_next(&clinic.clinic_id)?;
    clock.advance(Duration::minutes(2));
    engine.update_status(&first.check_in_id, CheckInStatus::InService)?;
    clock.advance(Duration::minutes(15));
    engine.update_status(&first.check_in_id, CheckInStatus::Completed)?;

    let second = engine.call_next(&clinic.clinic_id)?;
    clock.advance(Duration::minutes(5));
    engine.update_status(&second.check_in_id, CheckInStatus::NoShow)?;

    if let Some(last) = check_ins.last() {
        engine.cancel(&last.check_in_id)?;
    }

    let third = engine.call_next(&clinic.clinic_id)?;
    clock.advance(Duration::minutes(1));
    engine.update_status(&third.check_in_id, CheckInStatus::InService)?;

    for entry in &check_ins {
        let standing = engine.position_of(&entry.check_in_id)?;
        match standing.current_rank {
            Some(rank) => println!("  {} is #{} in line ({})", entry.check_in_id, rank, standing.status),
            None => println!("  {} is {}", entry.check_in_id, standing.status),
        }
    }

    let snapshot = engine.snapshot(&clinic.clinic_id)?;
    let patients = state.patients.clone();
    print_queue_snapshot(&clinic, &snapshot, config.utc_offset, |patient_id| {
        patients
            .find(patient_id)
            .ok()
            .flatten()
            .map(|p| p.display_name())
            .unwrap_or_else(|| patient_id.to_string())
    });
    print_clinic_counters(&clinic, &engine.counters(&clinic.clinic_id)?);

    let day_entries = engine.check_ins().find_by_clinic_day(&engine.today(&clinic.clinic_id))?;
    println!("\nArrivals by priority:");
    for (priority, count) in priority_counts(&day_entries) {
        println!("  {:<10} {}", priority.as_str(), count);
    }

    let export_path = Path::new("queue_export.csv");
    export_check_ins_to_file(&day_entries, export_path, config.utc_offset)?;
    println!("\nQueue exported to {}", export_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "web" {
        let port = args
            .get(2)
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(config.port);
        let clinics = load_directory(&config)?;
        info!("Starting clinic queue server with {} clinics", clinics.len());
        println!("Access the API at http://localhost:{}/api/clinics", port);

        let state = AppState::in_memory(clinics, &config, Arc::new(SystemClock));
        web::start_server(port, state).await?;
        return Ok(());
    }

    // CLI mode: scripted walk-in day
    run_demo(&config)
}
