use dive::synthetic::{add_noise, gaussian_distribution, simulate_signal};
use dive::transforms::sigmoid;
use dive::{
    BlockStep, DipolarModel, ExpandedDistributionStep, FixedNoiseDistributionStep, ForwardModel,
    GammaPrior, NoiseParameter, NoisePrecisionStep, OperatorKeys, Point, RegularizationStep,
    SignalDistributionStep, SignalModel, assemble_forward_operator, normal_equations, rand_p,
    regularization_operator,
};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;

struct Fixture {
    model: Arc<SignalModel>,
    l: Arc<Array2<f64>>,
    ltl: Arc<Array2<f64>>,
    p_true: Array1<f64>,
}

fn fixture() -> Fixture {
    let t = Array1::linspace(-0.2, 2.5, 54);
    let r = Array1::linspace(2.0, 5.0, 16);
    let p_true = gaussian_distribution(r.view(), 3.4, 0.6).expect("distribution");
    let clean = simulate_signal(&DipolarModel, t.view(), r.view(), p_true.view(), 0.2, 0.35, 1.0)
        .expect("signal");
    let noisy = add_noise(clean.view(), 0.01, &mut StdRng::seed_from_u64(2024)).expect("noise");
    let model = Arc::new(SignalModel::new(Arc::new(DipolarModel), t, noisy, r).expect("model"));
    let l = regularization_operator(16, 2).expect("operator");
    let ltl = l.t().dot(&l);
    Fixture {
        model,
        l: Arc::new(l),
        ltl: Arc::new(ltl),
        p_true,
    }
}

fn transformed_point(nr: usize) -> Point {
    Point::new()
        .set("P", Array1::<f64>::zeros(nr))
        .set("delta_log__", 2.0_f64.ln())
        .set("sigma_log__", 0.01_f64.ln())
        .set("tau", 1e4)
        .set("k_log__", 0.2_f64.ln())
        .set("lamb_logodds__", (0.35_f64 / 0.65).ln())
        .set("V0_lowerbound__", 0.0)
        .set("unrelated", 42.0)
}

fn assert_only_owned_changed(before: &Point, after: &Point, owned: &[String]) {
    assert_eq!(before.len(), after.len());
    for (name, value) in before.iter() {
        if owned.iter().any(|o| o == name) {
            continue;
        }
        assert_eq!(after.get(name), Some(value), "{name} changed");
    }
}

#[test]
fn signal_step_matches_manual_operator_assembly() {
    let fx = fixture();
    let step = SignalDistributionStep::new(
        "P",
        "delta_log__",
        NoiseParameter::Scale("sigma_log__".into()),
        OperatorKeys::new("k_log__", "lamb_logodds__", "V0_lowerbound__"),
        Arc::clone(&fx.model),
        Arc::clone(&fx.ltl),
    )
    .expect("step");
    let point = transformed_point(fx.model.nr());
    let snapshot = point.clone();

    let next = step.step(&point, &mut StdRng::seed_from_u64(10)).expect("step");
    assert_eq!(point, snapshot);
    assert_only_owned_changed(&point, &next, step.vars());

    // same natural-scale values the step recovers from the transformed point
    let delta = 2.0_f64.ln().exp();
    let sigma = 0.01_f64.ln().exp();
    let lamb = sigmoid((0.35_f64 / 0.65).ln());
    let background = DipolarModel.background(fx.model.time().view(), 0.2_f64.ln().exp());
    let k = assemble_forward_operator(
        fx.model.kernel().view(),
        background.view(),
        lamb,
        1.0,
        fx.model.dr(),
    )
    .expect("operator");
    let (ktk, ktv) = normal_equations(k.view(), fx.model.signal().view()).expect("normal eq");
    let expected = rand_p(
        delta,
        1.0 / (sigma * sigma),
        &ktk,
        &ktv,
        &fx.ltl,
        fx.model.nr(),
        &mut StdRng::seed_from_u64(10),
    )
    .expect("draw");
    let drawn = next.vector("P").expect("P");
    for (a, b) in drawn.iter().zip(expected.iter()) {
        assert!((a - b).abs() <= 1e-8 * (1.0 + b.abs()), "{a} vs {b}");
    }
}

#[test]
fn signal_step_recovers_the_distribution_mode_region() {
    let fx = fixture();
    let step = SignalDistributionStep::new(
        "P",
        "delta_log__",
        NoiseParameter::Precision("tau".into()),
        OperatorKeys::new("k_log__", "lamb_logodds__", "V0_lowerbound__"),
        Arc::clone(&fx.model),
        Arc::clone(&fx.ltl),
    )
    .expect("step");
    let point = transformed_point(fx.model.nr());
    let mut rng = StdRng::seed_from_u64(3);
    let mut mean = Array1::<f64>::zeros(fx.model.nr());
    let draws = 200;
    for _ in 0..draws {
        let next = step.step(&point, &mut rng).expect("step");
        let p = next.vector("P").expect("P");
        assert!(p.iter().all(|&v| v >= 0.0));
        mean += p;
    }
    mean /= draws as f64;
    let argmax = |v: &Array1<f64>| {
        v.iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, &x)| if x > best.1 { (i, x) } else { best })
            .0
    };
    let found = argmax(&mean) as i64;
    let truth = argmax(&fx.p_true) as i64;
    assert!((found - truth).abs() <= 2, "mode at {found}, expected near {truth}");
}

#[test]
fn expanded_step_divides_kts_by_signal_scale() {
    let ktk = Array2::from_shape_fn((4, 4), |(i, j)| if i == j { 3.0 } else { 0.4 });
    let kts = Array1::from(vec![1.0, 2.0, 0.5, -0.3]);
    let ltl = Arc::new(Array2::<f64>::eye(4));
    let step = ExpandedDistributionStep::new(
        "P",
        "delta",
        NoiseParameter::Scale("sigma_log__".into()),
        "V0_lowerbound__",
        ktk.clone(),
        kts.clone(),
        Arc::clone(&ltl),
    )
    .expect("step");
    let point = Point::new()
        .set("P", Array1::<f64>::zeros(4))
        .set("delta", 0.7)
        .set("sigma_log__", 0.5_f64.ln())
        .set("V0_lowerbound__", 2.0_f64.ln());
    let next = step.step(&point, &mut StdRng::seed_from_u64(8)).expect("step");
    assert_only_owned_changed(&point, &next, step.vars());

    let expected = rand_p(0.7, 4.0, &ktk, &(&kts / 2.0), &ltl, 4, &mut StdRng::seed_from_u64(8))
        .expect("draw");
    let drawn = next.vector("P").expect("P");
    for (a, b) in drawn.iter().zip(expected.iter()) {
        assert!((a - b).abs() <= 1e-10 * (1.0 + b.abs()));
    }
}

#[test]
fn fixed_noise_step_never_resolves_sigma() {
    let ktk = Array2::<f64>::eye(3) * 2.0;
    let kts = Array1::from(vec![1.0, 0.0, 0.5]);
    let ltl = Arc::new(Array2::<f64>::eye(3));
    let step =
        FixedNoiseDistributionStep::new("P", "delta_log__", 0.5, ktk.clone(), kts.clone(), Arc::clone(&ltl))
            .expect("step");
    // a sigma entry in the point is ignored
    let point = Point::new()
        .set("P", Array1::<f64>::zeros(3))
        .set("delta_log__", 0.0)
        .set("sigma_log__", 10.0);
    let next = step.step(&point, &mut StdRng::seed_from_u64(1)).expect("step");
    let expected = rand_p(1.0, 4.0, &ktk, &kts, &ltl, 3, &mut StdRng::seed_from_u64(1)).expect("draw");
    assert_eq!(next.vector("P").expect("P"), &expected);
    assert_only_owned_changed(&point, &next, step.vars());
}

#[test]
fn hyperparameter_steps_only_touch_their_variable() {
    let fx = fixture();
    let keys = OperatorKeys::new("k_log__", "lamb_logodds__", "V0_lowerbound__");
    let tau_step = NoisePrecisionStep::new(
        "tau",
        "P",
        keys,
        Arc::clone(&fx.model),
        GammaPrior::new(1.0, 1e-4).expect("prior"),
    );
    let delta_step =
        RegularizationStep::new("delta", "P", Arc::clone(&fx.l), GammaPrior::new(1.0, 1e-4).expect("prior"));
    let point = transformed_point(fx.model.nr())
        .with("P", fx.p_true.clone())
        .with("delta", 1.0);
    let mut rng = StdRng::seed_from_u64(12);

    let after_tau = tau_step.step(&point, &mut rng).expect("tau");
    assert_only_owned_changed(&point, &after_tau, tau_step.vars());
    let tau = after_tau.scalar("tau").expect("tau");
    // residual is pure noise with sigma = 0.01, so tau should be near 1e4
    assert!(tau > 3e3 && tau < 3e4, "tau = {tau}");

    let after_delta = delta_step.step(&point, &mut rng).expect("delta");
    assert_only_owned_changed(&point, &after_delta, delta_step.vars());
    assert!(after_delta.scalar("delta").expect("delta") > 0.0);
}
