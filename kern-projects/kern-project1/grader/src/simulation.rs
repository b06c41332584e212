use kern_project1::simulation::{SimulationConfig, run};
use std::time::Duration;

pub fn smoke() {
    let report = run(&SimulationConfig {
        vehicles: 40,
        threads: 4,
        ..Default::default()
    });
    assert_eq!(report.admitted, 40);
    assert_eq!(report.violations, 0);
}

pub fn stress() {
    for seed in [1, 0x5eed, 0xc0ffee] {
        let report = run(&SimulationConfig {
            vehicles: 600,
            threads: 24,
            crossing_time: Duration::from_micros(50),
            arrival_gap: Duration::ZERO,
            seed,
        });
        assert_eq!(report.admitted, 600);
        assert_eq!(report.violations, 0, "seed {seed:#x}");
        assert_eq!(report.per_direction.iter().sum::<usize>(), 600);
    }
}

pub fn every_direction_served() {
    let report = run(&SimulationConfig {
        vehicles: 400,
        threads: 16,
        crossing_time: Duration::from_micros(100),
        arrival_gap: Duration::ZERO,
        seed: 7,
    });
    assert_eq!(report.violations, 0);
    for (dir, crossed) in report.per_direction.iter().enumerate() {
        assert!(*crossed > 0, "direction {dir} starved");
    }
}
