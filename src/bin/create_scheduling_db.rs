use std::path::Path;

use session_scheduling::adapters::db::{
    insert_student, open_connection, run_migrations, schema_version, upsert_doctor,
};
use session_scheduling::domain::models::{Doctor, NewStudent};

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to create scheduling db: {error}");
        std::process::exit(1);
    }
}

struct Options {
    path: String,
    force: bool,
    doctors: Vec<Doctor>,
    students: Vec<NewStudent>,
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        print_help();
        return Ok(());
    };

    let path_ref = Path::new(&options.path);
    if let Some(parent) = path_ref.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }

    if options.force && path_ref.exists() {
        std::fs::remove_file(path_ref)
            .map_err(|error| format!("failed to remove existing db file: {error}"))?;
    }

    let mut connection = open_connection(&options.path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;
    let version = schema_version(&connection).map_err(|error| error.to_string())?;

    for doctor in &options.doctors {
        upsert_doctor(&connection, doctor).map_err(|error| error.to_string())?;
    }
    for student in &options.students {
        insert_student(&connection, student)
            .map_err(|error| format!("failed to add student {:?}: {error}", student.name))?;
    }

    println!("created/updated scheduling db at: {}", options.path);
    println!("schema version: {version}");
    if !options.doctors.is_empty() || !options.students.is_empty() {
        println!(
            "seeded {} doctor(s) and {} student(s)",
            options.doctors.len(),
            options.students.len()
        );
    }
    Ok(())
}

/// `Ok(None)` means help was requested.
fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    let mut options = Options {
        path: "./data/scheduling.db".to_string(),
        force: false,
        doctors: Vec::new(),
        students: Vec::new(),
    };

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--path" => {
                options.path = value_after(&args, index, "--path")?.to_string();
                index += 2;
            }
            "--doctor" => {
                options
                    .doctors
                    .push(parse_doctor(value_after(&args, index, "--doctor")?)?);
                index += 2;
            }
            "--student" => {
                let name = value_after(&args, index, "--student")?.trim();
                if name.is_empty() {
                    return Err("--student requires a name".to_string());
                }
                options.students.push(NewStudent {
                    name: name.to_string(),
                    school: None,
                    year_of_study: None,
                });
                index += 2;
            }
            "--force" => {
                options.force = true;
                index += 1;
            }
            "--help" | "-h" => return Ok(None),
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    Ok(Some(options))
}

fn value_after<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, String> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_doctor(value: &str) -> Result<Doctor, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [mcr_number, name, email]
            if !mcr_number.is_empty() && !name.is_empty() && email.contains('@') =>
        {
            Ok(Doctor {
                mcr_number: mcr_number.to_string(),
                name: name.to_string(),
                email: email.to_string(),
            })
        }
        _ => Err(format!("--doctor expects MCR,Name,email but got {value:?}")),
    }
}

fn print_help() {
    println!("create_scheduling_db");
    println!();
    println!("Usage:");
    println!(
        "  cargo run --bin create_scheduling_db -- [--path <file>] [--force] \
         [--doctor MCR,Name,email]... [--student Name]..."
    );
    println!();
    println!("Options:");
    println!("  --path <file>      target sqlite file (default: ./data/scheduling.db)");
    println!("  --force            delete existing file before creating");
    println!("  --doctor <entry>   add or update a doctor in the directory");
    println!("  --student <name>   add a student to the canonical directory");
}
