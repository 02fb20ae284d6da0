use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gumbel};
use std::fmt::Write;
use std::path::Path;

pub const ALTERNATIVES: [&str; 4] = ["drive", "cycle", "walk", "PT"];

/// Cycle and walk cost columns are never written, so they read as zero.
pub const CONFIG: &str = r#"
case_id_column = "id"
mode_column = "mode"
alternatives = ["drive", "cycle", "walk", "PT"]
reference = 0
constant = true
generic_attributes = ["income"]

[alternative_attributes]
time = ["drive_time", "cycle_time", "walk_time", "pt_time"]
cost = ["drive_cost", "cycle_cost", "walk_cost", "pt_cost"]

[cv]
n_folds = 3
seed = 7
"#;

pub const TRUE_TIME: f64 = -0.1;
pub const TRUE_COST: f64 = -0.3;
/// Income effect relative to driving, by alternative index.
const INCOME: [f64; 4] = [0.0, 0.0, -0.2, -0.4];
const ASC: [f64; 4] = [0.0, -0.5, 0.5, 1.0];

pub struct Survey {
    pub csv: String,
    /// Same cases without the mode column, tab separated.
    pub tsv_without_modes: String,
    pub chosen: Vec<usize>,
}

/// Draws a survey from the logit model above; every tenth mode is written as its index.
pub fn simulate_survey(n: usize, seed: u64) -> Survey {
    let mut rng = StdRng::seed_from_u64(seed);
    let gumbel = Gumbel::new(0.0, 1.0).expect("valid gumbel");
    let time_ranges = [(5.0, 40.0), (10.0, 60.0), (10.0, 90.0), (10.0, 60.0)];

    let mut csv = String::from("id,mode,income,drive_time,cycle_time,walk_time,pt_time,drive_cost,pt_cost\n");
    let mut tsv = String::from("id\tincome\tdrive_time\tcycle_time\twalk_time\tpt_time\tdrive_cost\tpt_cost\n");
    let mut chosen = Vec::with_capacity(n);

    for case in 0..n {
        let id = 1000 + case;
        let income: f64 = rng.gen_range(1.0..5.0);
        let times: Vec<f64> = time_ranges
            .iter()
            .map(|&(lo, hi)| rng.gen_range(lo..hi))
            .collect();
        let drive_cost: f64 = rng.gen_range(1.0..8.0);
        let pt_cost: f64 = rng.gen_range(1.0..4.0);
        let costs = [drive_cost, 0.0, 0.0, pt_cost];

        let mut best = (0, f64::NEG_INFINITY);
        for j in 0..4 {
            let utility = TRUE_TIME * times[j]
                + TRUE_COST * costs[j]
                + INCOME[j] * income
                + ASC[j]
                + gumbel.sample(&mut rng);
            if utility > best.1 {
                best = (j, utility);
            }
        }
        chosen.push(best.0);

        let label = if case % 10 == 0 {
            best.0.to_string()
        } else {
            ALTERNATIVES[best.0].to_string()
        };
        let attrs = format!(
            "{income:.4},{:.4},{:.4},{:.4},{:.4},{drive_cost:.4},{pt_cost:.4}",
            times[0], times[1], times[2], times[3]
        );
        writeln!(csv, "{id},{label},{attrs}").expect("write to string");
        writeln!(tsv, "{id}\t{}", attrs.replace(',', "\t")).expect("write to string");
    }

    Survey {
        csv,
        tsv_without_modes: tsv,
        chosen,
    }
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write test file");
    path.to_str().expect("utf-8 path").to_string()
}
