//! Integration tests: generate synthetic peaks from known cells, run every
//! search strategy, and verify the recovered UB describes the same lattice.


use approx::assert_abs_diff_eq;
use ubfinder::{
    find_ub, find_ub_from_candidate_lists, find_ub_sequential, find_ub_without_lattice,
    get_indexed_peaks, make_hemisphere_directions, scan_for_ub, select_direction, CandidateConfig,
    FindUbConfig, LatticeFreeConfig, LatticeParameters, Matrix3, ScanConfig, SequentialConfig,
    TracingObserver, UbFit, Vector3,
};

use test_data::{
    natrolite, peaks_from_indices, random_miller_indices, same_lattice, spread_miller_indices,
    triclinic_ub,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

/// Every peak indexed, and the implied cell within 0.01 Å and 0.1° of the
/// generating one.
fn assert_recovers_triclinic(fit: &UbFit, num_peaks: usize) {
    let truth = triclinic_ub();
    assert_eq!(fit.num_indexed, num_peaks, "indexed {} of {}", fit.num_indexed, num_peaks);
    assert!(same_lattice(&fit.ub, &truth, 0.05), "UB = {}", fit.ub);

    let expected = LatticeParameters::from_ub(&truth).unwrap();
    let got = LatticeParameters::from_ub(&fit.ub).unwrap();
    println!("Recovered cell: {:?}", got);
    assert_abs_diff_eq!(got.a, expected.a, epsilon = 0.01);
    assert_abs_diff_eq!(got.b, expected.b, epsilon = 0.01);
    assert_abs_diff_eq!(got.c, expected.c, epsilon = 0.01);
    assert_abs_diff_eq!(got.alpha, expected.alpha, epsilon = 0.1);
    assert_abs_diff_eq!(got.beta, expected.beta, epsilon = 0.1);
    assert_abs_diff_eq!(got.gamma, expected.gamma, epsilon = 0.1);
}

fn noisy_triclinic_peaks() -> Vec<Vector3> {
    peaks_from_indices(&triclinic_ub(), &spread_miller_indices(), 2e-4, 42)
}

#[test]
fn test_cubic_scan_recovers_axes() {
    init_tracing();

    let truth = Matrix3::from_diagonal(&Vector3::new(0.2, 0.2, 0.2));
    let q_vectors = peaks_from_indices(&truth, &random_miller_indices(20, 5, 7), 0.0, 0);
    let lattice = LatticeParameters::new(5.0, 5.0, 5.0, 90.0, 90.0, 90.0);
    let config = ScanConfig {
        degrees_per_step: 5.0,
        tolerance: 0.1,
        two_pass: true,
    };

    let result = scan_for_ub(&q_vectors, &lattice, &config).unwrap();
    assert!(result.fit_error < 1e-6, "error {}", result.fit_error);
    assert!(same_lattice(&result.ub, &truth, 1e-6));

    let indexed = get_indexed_peaks(&result.ub, &q_vectors, 0.1).unwrap();
    assert_eq!(indexed.num_indexed(), q_vectors.len());
}

#[test]
fn test_progressive_triclinic() {
    init_tracing();

    let q_vectors = noisy_triclinic_peaks();
    let lattice = LatticeParameters::from_ub(&triclinic_ub()).unwrap();
    let config = FindUbConfig {
        tolerance: 0.15,
        num_initial: 16,
        degrees_per_step: 2.0,
        ..Default::default()
    };

    let fit = find_ub(&q_vectors, &lattice, &config, &mut TracingObserver).unwrap();
    assert_recovers_triclinic(&fit, q_vectors.len());
}

#[test]
fn test_sequential_triclinic() {
    init_tracing();

    let q_vectors = noisy_triclinic_peaks();
    let lattice = LatticeParameters::from_ub(&triclinic_ub()).unwrap();
    let config = SequentialConfig {
        tolerance: 0.15,
        ..Default::default()
    };

    let fit = find_ub_sequential(&q_vectors, &lattice, &config, &mut TracingObserver).unwrap();
    assert_recovers_triclinic(&fit, q_vectors.len());
}

#[test]
fn test_candidate_lists_triclinic() {
    init_tracing();

    let q_vectors = noisy_triclinic_peaks();
    let lattice = LatticeParameters::from_ub(&triclinic_ub()).unwrap();
    let config = CandidateConfig {
        tolerance: 0.15,
        degrees_per_step: 0.5,
        ..Default::default()
    };

    let fit =
        find_ub_from_candidate_lists(&q_vectors, &lattice, &config, &mut TracingObserver).unwrap();
    assert_recovers_triclinic(&fit, q_vectors.len());
    assert!(fit.ub.determinant() > 0.0);
}

#[test]
fn test_lattice_free_triclinic() {
    init_tracing();

    let q_vectors = noisy_triclinic_peaks();
    let config = LatticeFreeConfig {
        min_d: 4.0,
        max_d: 7.5,
        tolerance: 0.08,
        num_initial: 16,
        ..Default::default()
    };

    let fit = find_ub_without_lattice(&q_vectors, &config, &mut TracingObserver).unwrap();
    assert_eq!(fit.num_indexed, q_vectors.len());
    // No reduction step, so only the lattice is fixed, not the choice of cell.
    assert!(same_lattice(&fit.ub, &triclinic_ub(), 0.05), "UB = {}", fit.ub);
}

#[test]
fn test_natrolite_a_direction() {
    init_tracing();

    let q_vectors = natrolite();
    let hemisphere = make_hemisphere_directions(90).unwrap();
    let (direction, num_indexed) = select_direction(&q_vectors, &hemisphere, 6.5781, 0.2).unwrap();

    assert_eq!(num_indexed, 12);
    assert_abs_diff_eq!(direction.x, -0.399027, epsilon = 1e-5);
    assert_abs_diff_eq!(direction.y, 0.615661, epsilon = 1e-5);
    assert_abs_diff_eq!(direction.z, -0.679513, epsilon = 1e-5);
}

#[test]
fn test_configs_from_json() {
    // Partial documents fall back to the defaults for missing fields.
    let config: FindUbConfig =
        serde_json::from_str(r#"{ "tolerance": 0.2, "num_initial": 6 }"#).unwrap();
    assert_eq!(config.tolerance, 0.2);
    assert_eq!(config.num_initial, 6);
    assert_eq!(config.growth_factor, FindUbConfig::default().growth_factor);

    let candidates = CandidateConfig {
        degrees_per_step: 0.5,
        ..Default::default()
    };
    let text = serde_json::to_string(&candidates).unwrap();
    let back: CandidateConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, candidates);

    let lattice_free: LatticeFreeConfig = serde_json::from_str(r#"{ "max_d": 12.0 }"#).unwrap();
    assert_eq!(lattice_free.max_d, 12.0);
    assert_eq!(lattice_free.min_d, LatticeFreeConfig::default().min_d);

    let lattice = LatticeParameters::new(6.6, 9.7, 9.9, 84.0, 71.0, 70.0);
    let text = serde_json::to_string(&lattice).unwrap();
    let back: LatticeParameters = serde_json::from_str(&text).unwrap();
    assert_eq!(back, lattice);
    assert!(back.validate().is_ok());
}
