//! A fade-in stack at alpha = 1 must match its pruned straight stack.

use covergan_core::{Architecture, ModelConfig};
use covergan_models::{
    AnyGenerator, ModelError, ProGanDiscriminator, ProgressiveGenerator, SharedAlpha, StackPlan,
};
use mlx_rs::Array;
use serial_test::serial;

fn config(architecture: Architecture) -> ModelConfig {
    ModelConfig {
        architecture,
        latent_size: 16,
        n_blocks: 2,
        base_channels: 16,
        reference_channels: 128,
        n_mapping: 2,
        ..Default::default()
    }
}

fn max_abs_diff(a: &Array, b: &Array) -> f32 {
    a.subtract(b).unwrap().abs().unwrap().max(None).unwrap().item::<f32>()
}

#[test]
#[serial]
fn test_generator_collapses_at_full_alpha() {
    for architecture in [Architecture::ProGan, Architecture::StyleGan] {
        let mut g = AnyGenerator::from_config(&config(architecture), 7).unwrap();
        g.set_training(false);
        let z = mlx_rs::random::normal::<f32>(&[4, 16], None, None, None).unwrap();

        for block in 1..=2 {
            let alpha = SharedAlpha::new(0.0);
            let plan = StackPlan::fade_in(g.topology(), block, alpha.clone()).unwrap();
            alpha.set(1.0);

            let faded = g.forward_plan(&plan, &z, None, Some(1)).unwrap();
            let pruned = g.forward_plan(&plan.prune(), &z, None, Some(1)).unwrap();
            assert!(
                max_abs_diff(&faded, &pruned) < 1e-5,
                "{:?} block {}",
                architecture,
                block
            );
        }
    }
}

#[test]
#[serial]
fn test_discriminator_collapses_at_full_alpha() {
    let d = ProGanDiscriminator::new(&config(Architecture::ProGan)).unwrap();
    let images = mlx_rs::random::uniform::<_, f32>(-1.0, 1.0, &[8, 3, 16, 16], None).unwrap();

    let alpha = SharedAlpha::new(1.0);
    let plan = StackPlan::fade_in(d.topology(), 2, alpha).unwrap();
    let faded = d.forward_plan(&plan, &images, None).unwrap();
    let pruned = d.forward_plan(&plan.prune(), &images, None).unwrap();
    assert!(max_abs_diff(&faded, &pruned) < 1e-5);
}

#[test]
#[serial]
fn test_alpha_is_shared_between_networks() {
    let g = AnyGenerator::from_config(&config(Architecture::ProGan), 0).unwrap();
    let d = ProGanDiscriminator::new(&config(Architecture::ProGan)).unwrap();

    let alpha = SharedAlpha::new(0.0);
    let g_plan = StackPlan::fade_in(g.topology(), 1, alpha.clone()).unwrap();
    let d_plan = StackPlan::fade_in(d.topology(), 1, alpha.clone()).unwrap();
    alpha.set(0.4);
    assert_eq!(g_plan.alpha(), 0.4);
    assert_eq!(d_plan.alpha(), 0.4);
}

#[test]
#[serial]
fn test_block_beyond_topology_is_rejected() {
    let g = AnyGenerator::from_config(&config(Architecture::StyleGan), 0).unwrap();
    let z = mlx_rs::random::normal::<f32>(&[2, 16], None, None, None).unwrap();
    assert!(matches!(
        g.forward(&z, None, 3, 0.5, None),
        Err(ModelError::InvalidBlock { requested: 3, max: 2 })
    ));

    let d = ProGanDiscriminator::new(&config(Architecture::ProGan)).unwrap();
    let images = mlx_rs::random::normal::<f32>(&[2, 3, 32, 32], None, None, None).unwrap();
    assert!(matches!(
        d.forward(&images, None, 3, 1.0),
        Err(ModelError::InvalidBlock { .. })
    ));
}
