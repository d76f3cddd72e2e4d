//! CSV bulk import and export of users and TPS locations.
//!
//! Parsing is split from persistence: a file is first turned into typed rows
//! plus per-row errors, then each row is written on its own so one bad row
//! never blocks the rest of the file.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::{
    auth::{normalize_email, validate_password},
    db::{
        self,
        tps::LocationInput,
        users::{NewTpsProfile, NewUser, UserExport},
    },
    errors::AppError,
    models::{Role, TpsLocation, User},
    pricing::valid_coordinates,
    AppState,
};

pub const USER_COLUMNS: [&str; 5] = ["name", "email", "phone", "password", "role"];
pub const USER_OPTIONAL_COLUMNS: [&str; 2] = ["tpsName", "capacity"];
pub const LOCATION_COLUMNS: [&str; 7] = [
    "Nama TPS",
    "Kecamatan",
    "Alamat",
    "Latitude",
    "Longitude",
    "Jam Operasional",
    "No. Telepon",
];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("The file contains no data rows")]
    Empty,
    #[error("Unreadable CSV: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// Spreadsheet row number, the header being row 1.
    pub row: usize,
    pub key: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ImportReport<T> {
    pub created: Vec<T>,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub row: usize,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub role: Role,
    pub tps_name: Option<String>,
    pub capacity: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LocationRow {
    pub row: usize,
    pub input: LocationInput,
}

/// Header lookup by trimmed, case-insensitive column name.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn read(reader: &mut csv::Reader<&[u8]>, required: &[&str]) -> Result<Self, ImportError> {
        let index = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect::<HashMap<_, _>>();
        let missing = required
            .iter()
            .filter(|c| !index.contains_key(&c.to_lowercase()))
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns(missing));
        }
        Ok(Self(index))
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: &str) -> &'r str {
        self.0
            .get(&column.to_lowercase())
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .unwrap_or("")
    }
}

fn reader(data: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data)
}

/// Line the record starts on, counting the header as line 1. The reader
/// positions a record right after the previous terminator, so blank lines
/// skipped in between are added back.
fn line_of(data: &[u8], record: &Result<csv::StringRecord, csv::Error>, previous: usize) -> usize {
    let position = match record {
        Ok(record) => record.position(),
        Err(e) => e.position(),
    };
    let Some(position) = position else {
        return previous + 1;
    };
    let skipped = data
        .get(position.byte() as usize..)
        .unwrap_or_default()
        .iter()
        .take_while(|&&b| b == b'\n' || b == b'\r')
        .filter(|&&b| b == b'\n')
        .count();
    position.line() as usize + skipped
}

fn is_blank(record: &csv::StringRecord) -> bool {
    record.iter().all(|f| f.trim().is_empty())
}

fn parse_user_record(columns: &Columns, record: &csv::StringRecord, row: usize) -> Result<UserRow, String> {
    let name = columns.get(record, "name");
    if name.is_empty() {
        return Err("name is required".to_string());
    }
    let email = normalize_email(columns.get(record, "email")).map_err(|e| e.to_string())?;
    let password = columns.get(record, "password");
    validate_password(password).map_err(|e| e.to_string())?;
    let role_raw = columns.get(record, "role");
    let role = Role::parse(role_raw)
        .ok_or_else(|| format!("unknown role '{}' (expected USER, TPS or ADMIN)", role_raw))?;

    let tps_name = Some(columns.get(record, "tpsName"))
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if role == Role::Tps && tps_name.is_none() {
        return Err("tpsName is required for TPS users".to_string());
    }
    let capacity = match columns.get(record, "capacity") {
        "" => None,
        raw => match raw.parse::<f64>() {
            Ok(c) if c.is_finite() && c >= 0.0 => Some(c),
            _ => return Err(format!("capacity '{}' is not a valid number", raw)),
        },
    };

    Ok(UserRow {
        row,
        name: name.to_string(),
        email,
        phone: columns.get(record, "phone").to_string(),
        password: password.to_string(),
        role,
        tps_name,
        capacity,
    })
}

pub fn parse_users(data: &[u8]) -> Result<(Vec<UserRow>, Vec<RowError>), ImportError> {
    let mut reader = reader(data);
    let columns = Columns::read(&mut reader, &USER_COLUMNS)?;
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    let mut seen = 0;

    let mut row = 1;

    for record in reader.records() {
        row = line_of(data, &record, row);
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(RowError {
                    row,
                    key: String::new(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        if is_blank(&record) {
            continue;
        }
        seen += 1;
        match parse_user_record(&columns, &record, row) {
            Ok(parsed) => rows.push(parsed),
            Err(error) => errors.push(RowError {
                row,
                key: columns.get(&record, "email").to_string(),
                error,
            }),
        }
    }

    if seen == 0 && errors.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok((rows, errors))
}

fn parse_coordinate(raw: &str, column: &str) -> Result<f64, String> {
    raw.replace(',', ".")
        .parse::<f64>()
        .map_err(|_| format!("{} '{}' is not a number", column, raw))
}

fn parse_location_record(
    columns: &Columns,
    record: &csv::StringRecord,
) -> Result<LocationInput, String> {
    let name = columns.get(record, "Nama TPS");
    if name.is_empty() {
        return Err("Nama TPS is required".to_string());
    }
    let latitude = parse_coordinate(columns.get(record, "Latitude"), "Latitude")?;
    let longitude = parse_coordinate(columns.get(record, "Longitude"), "Longitude")?;
    if !valid_coordinates(latitude, longitude) {
        return Err("coordinates are out of range".to_string());
    }
    Ok(LocationInput {
        name: name.to_string(),
        district: columns.get(record, "Kecamatan").to_string(),
        address: columns.get(record, "Alamat").to_string(),
        latitude,
        longitude,
        operating_hours: columns.get(record, "Jam Operasional").to_string(),
        phone: columns.get(record, "No. Telepon").to_string(),
    })
}

pub fn parse_locations(data: &[u8]) -> Result<(Vec<LocationRow>, Vec<RowError>), ImportError> {
    let mut reader = reader(data);
    let columns = Columns::read(&mut reader, &LOCATION_COLUMNS[..5])?;
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    let mut seen = 0;

    let mut row = 1;

    for record in reader.records() {
        row = line_of(data, &record, row);
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(RowError {
                    row,
                    key: String::new(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        if is_blank(&record) {
            continue;
        }
        seen += 1;
        let name = columns.get(&record, "Nama TPS");
        let parsed = parse_location_record(&columns, &record);
        match parsed {
            Ok(input) => rows.push(LocationRow { row, input }),
            Err(error) => errors.push(RowError {
                row,
                key: name.to_string(),
                error,
            }),
        }
    }

    if seen == 0 && errors.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok((rows, errors))
}

/// Creates every valid user row; rows failing lookups or inserts are
/// reported next to the ones that succeeded.
pub async fn import_users(state: &AppState, data: &[u8]) -> Result<ImportReport<User>, AppError> {
    let (rows, mut errors) = parse_users(data)?;
    let mut created = Vec::new();
    let mut emails = HashSet::new();

    for row in rows {
        let fail = |error: String| RowError {
            row: row.row,
            key: row.email.clone(),
            error,
        };
        if !emails.insert(row.email.clone()) {
            errors.push(fail("email appears more than once in the file".to_string()));
            continue;
        }

        let tps = match (&row.role, &row.tps_name) {
            (Role::Tps, Some(tps_name)) => {
                match db::tps::find_location_by_name(state, tps_name).await? {
                    Some(location) => Some(profile_for(&location, row.capacity)),
                    None => {
                        errors.push(fail(format!(
                            "TPS location '{}' does not exist",
                            tps_name
                        )));
                        continue;
                    }
                }
            }
            _ => None,
        };

        let new = NewUser {
            name: row.name.clone(),
            email: row.email.clone(),
            phone: row.phone.clone(),
            password: row.password.clone(),
            role: row.role,
            tps,
        };
        match db::users::create_user(state, new).await {
            Ok(user) => created.push(user),
            Err(AppError::Validation(message)) => errors.push(fail(message)),
            Err(e) => return Err(e),
        }
    }

    errors.sort_by_key(|e| e.row);
    log::info!(
        "User import finished: {} created, {} rejected",
        created.len(),
        errors.len()
    );
    Ok(ImportReport { created, errors })
}

fn profile_for(location: &TpsLocation, capacity: Option<f64>) -> NewTpsProfile {
    NewTpsProfile {
        location_id: Some(location.id),
        tps_name: location.name.clone(),
        address: location.address.clone(),
        latitude: Some(location.latitude),
        longitude: Some(location.longitude),
        operating_hours: location.operating_hours.clone(),
        capacity,
    }
}

pub async fn import_locations(
    state: &AppState,
    data: &[u8],
) -> Result<ImportReport<TpsLocation>, AppError> {
    let (rows, mut errors) = parse_locations(data)?;
    let mut created = Vec::new();

    for LocationRow { row, input } in rows {
        let key = input.name.clone();
        match db::tps::create_location(state, input).await {
            Ok(location) => created.push(location),
            Err(AppError::Validation(error)) => errors.push(RowError { row, key, error }),
            Err(e) => return Err(e),
        }
    }

    errors.sort_by_key(|e| e.row);
    log::info!(
        "TPS location import finished: {} created, {} rejected",
        created.len(),
        errors.len()
    );
    Ok(ImportReport { created, errors })
}

fn write_csv(header: &[&str], rows: Vec<Vec<String>>) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_err = |e: csv::Error| AppError::Import(ImportError::Csv(e));
    writer.write_record(header).map_err(csv_err)?;
    for row in rows {
        writer.write_record(&row).map_err(csv_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::IoError(e.into_error()))
}

pub fn user_template() -> Result<Vec<u8>, AppError> {
    let header = USER_COLUMNS
        .iter()
        .chain(USER_OPTIONAL_COLUMNS.iter())
        .copied()
        .collect::<Vec<_>>();
    let example = [
        "Budi Santoso",
        "budi@example.com",
        "081234567890",
        "rahasia123",
        "TPS",
        "TPS Melati",
        "500",
    ];
    write_csv(&header, vec![example.iter().map(|s| s.to_string()).collect()])
}

pub fn location_template() -> Result<Vec<u8>, AppError> {
    let example = [
        "TPS Melati",
        "Coblong",
        "Jl. Melati No. 1",
        "-6.8915",
        "107.6107",
        "07:00 - 17:00",
        "022-1234567",
    ];
    write_csv(
        &LOCATION_COLUMNS,
        vec![example.iter().map(|s| s.to_string()).collect()],
    )
}

pub fn export_users(users: &[UserExport]) -> Result<Vec<u8>, AppError> {
    let header = ["name", "email", "phone", "role"]
        .into_iter()
        .chain(USER_OPTIONAL_COLUMNS)
        .collect::<Vec<_>>();
    let rows = users
        .iter()
        .map(|u| {
            vec![
                u.name.clone(),
                u.email.clone(),
                u.phone.clone(),
                u.role.as_str().to_string(),
                u.tps_name.clone().unwrap_or_default(),
                u.capacity.map(|c| c.to_string()).unwrap_or_default(),
            ]
        })
        .collect();
    write_csv(&header, rows)
}

pub fn export_locations(locations: &[TpsLocation]) -> Result<Vec<u8>, AppError> {
    let rows = locations
        .iter()
        .map(|l| {
            vec![
                l.name.clone(),
                l.district.clone(),
                l.address.clone(),
                l.latitude.to_string(),
                l.longitude.to_string(),
                l.operating_hours.clone(),
                l.phone.clone(),
            ]
        })
        .collect();
    write_csv(&LOCATION_COLUMNS, rows)
}
