use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_the_subcommands() {
    Command::cargo_bin("liveability")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("list"))
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("check"))
                .and(predicate::str::contains("log")),
        );
}

#[test]
fn list_prints_the_registry_in_order() {
    Command::cargo_bin("liveability")
        .unwrap()
        .arg("list")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("01_create_database")
                .and(predicate::str::contains("06_sausage_buffers"))
                .and(predicate::str::contains("12_road_indicators"))
                .and(predicate::str::contains("18_uli"))
                .and(predicate::str::contains("19_area_variation")),
        );
}

#[test]
fn check_config_fails_on_missing_file() {
    Command::cargo_bin("liveability")
        .unwrap()
        .args(["check", "config", "--config", "/nonexistent/config.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn check_config_rejects_an_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[postgresql]\nhost = \"localhost\"\n").unwrap();

    Command::cargo_bin("liveability")
        .unwrap()
        .args(["check", "config", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config"));
}

#[test]
fn run_rejects_an_unknown_step_token() {
    // Selection is resolved before any database work, but config must load
    // first; a fabricated-but-valid config keeps this hermetic.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();

    Command::cargo_bin("liveability")
        .unwrap()
        .args(["run", "--only", "nope", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown step 'nope'"));
}

const VALID_CONFIG: &str = r#"
[postgresql]
host = "localhost"
database = "li_melb_2016"
user = "li"
password = "li_pass"

[data]
folder_path = "/tmp/li_data"
study_region = "melb"
meshblocks = "mb_dwellings"
suburbs = "suburb_ssc_2016"
lgas = "lga_2016"

[abs]
employment = "abs/employment.csv"
car_ownership = "abs/car_ownership.csv"
travel_to_work = "abs/travel_to_work.csv"
live_work_sa3 = "abs/live_work_sa3.csv"
affordable_housing = "abs/affordable_housing.csv"
tenure = "abs/tenure.csv"
irsd = "abs/irsd.csv"

[parcels]
parcel_dwellings = "parcel_dwellings"
parcel_id = "DETAIL_PID"

[destinations]
study_destinations = "study_destinations"
destination_id = "dest_oid"

[[destinations.classes]]
name = "supermarkets"
code = 1
cutoff_m = 1000

[roads]
network_edges = "edges_pedestrian"
network_nodes = "nodes_pedestrian"
intersections = "cleaned_intersections_12m.csv"

[pos]
areas = "open_space_areas"

[network]
distance = 1600
line_buffer = 50
tolerance = 500

[workspace]
srid = 3111
hex_grid = "hex_3200m_diag"

[air_pollution]
no2 = "no2_predictions.csv"
"#;
