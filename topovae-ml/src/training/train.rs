//! The train/test epoch loop.

use candle_core::{Device, Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Instant;

use crate::config::RunConfig;
use crate::datasets::{Dataset, TrainTestSplit};
use crate::error::MlError;
use crate::models::ManifoldVae;
use crate::tracker::RunTracker;
use crate::training::callbacks::{CallbackAction, EarlyStopping, ReduceLrOnPlateau};
use crate::training::checkpoint::CheckpointManager;
use crate::training::metrics::TrainingMetrics;

/// Result of a completed training run.
pub struct TrainOutcome {
    pub train_losses: Vec<f64>,
    pub test_losses: Vec<f64>,
    pub metrics: TrainingMetrics,
}

/// Train and evaluate the model; on return the var map holds the weights of
/// the best epoch by test loss.
pub fn train_test(
    model: &dyn ManifoldVae,
    varmap: &mut VarMap,
    dataset: &Dataset,
    split: &TrainTestSplit,
    config: &RunConfig,
    checkpoints: Option<&CheckpointManager>,
    mut tracker: Option<&mut RunTracker>,
) -> Result<TrainOutcome, MlError> {
    if split.train.is_empty() || split.test.is_empty() {
        return Err(MlError::training("empty train or test split"));
    }
    let device = config.candle_device()?;
    let started = Instant::now();

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: config.lr,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;
    let mut scheduler = config
        .scheduler
        .then(|| ReduceLrOnPlateau::new(config.lr, 0.5, 10));
    let mut early_stopping = config
        .early_stop_patience
        .map(|patience| EarlyStopping::new(patience, 0.0));

    let best_path = std::env::temp_dir().join(format!(
        "{}_{}_best.safetensors",
        config.run_name,
        uuid::Uuid::new_v4()
    ));

    let mut metrics = TrainingMetrics::default();
    let mut train_indices = split.train.clone();
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let log_interval = config.log_interval.max(1);
    let checkpt_interval = config.checkpt_interval.max(1);

    for epoch in 1..=config.n_epochs {
        if config.batch_shuffle {
            train_indices.shuffle(&mut rng);
        }

        let mut train_loss_sum = 0.0;
        for batch_indices in train_indices.chunks(config.batch_size) {
            let x = batch_tensor(dataset, batch_indices, &device)?;
            let loss = batch_loss(model, &x, config, true)?;
            optimizer.backward_step(&loss)?;
            train_loss_sum += f64::from(loss.to_scalar::<f32>()?) * batch_indices.len() as f64;
        }
        let train_loss = train_loss_sum / split.train.len() as f64;

        let mut test_loss_sum = 0.0;
        for batch_indices in split.test.chunks(config.batch_size) {
            let x = batch_tensor(dataset, batch_indices, &device)?;
            let loss = batch_loss(model, &x, config, false)?;
            test_loss_sum += f64::from(loss.to_scalar::<f32>()?) * batch_indices.len() as f64;
        }
        let test_loss = test_loss_sum / split.test.len() as f64;

        let improved = metrics.record_epoch(train_loss, test_loss);
        if improved {
            varmap.save(&best_path)?;
        }

        if epoch % log_interval == 0 {
            tracing::info!(
                run = %config.run_name,
                epoch,
                train_loss,
                test_loss,
                "epoch complete"
            );
            if let Some(t) = tracker.as_deref_mut() {
                t.log_scalar("train_loss", Some(epoch), train_loss)?;
                t.log_scalar("test_loss", Some(epoch), test_loss)?;
            }
        }

        if epoch % checkpt_interval == 0 {
            if let Some(manager) = checkpoints {
                manager.save_epoch(&config.run_name, epoch, test_loss, varmap)?;
            }
        }

        if let Some(s) = scheduler.as_mut() {
            if let Some(new_lr) = s.on_epoch_end(test_loss) {
                optimizer.set_learning_rate(new_lr);
                metrics.add_custom_metric("lr", new_lr);
                tracing::info!(run = %config.run_name, epoch, new_lr, "reduced learning rate");
            }
        }

        if let Some(e) = early_stopping.as_mut() {
            if e.on_epoch_end(test_loss) == CallbackAction::Stop {
                tracing::info!(run = %config.run_name, epoch, "early stopping");
                break;
            }
        }
    }

    if best_path.exists() {
        varmap.load(&best_path)?;
        let _ = std::fs::remove_file(&best_path);
    }
    metrics.total_training_time_secs = started.elapsed().as_secs_f64();

    Ok(TrainOutcome {
        train_losses: metrics.train_loss_history.clone(),
        test_losses: metrics.test_loss_history.clone(),
        metrics,
    })
}

/// Rows of the dataset as an f32 tensor of shape (batch, data_dim).
pub fn batch_tensor(
    dataset: &Dataset,
    indices: &[usize],
    device: &Device,
) -> Result<Tensor, MlError> {
    let dim = dataset.data_dim();
    let mut flat = Vec::with_capacity(indices.len() * dim);
    for &i in indices {
        flat.extend(dataset.points[i].iter().map(|&v| v as f32));
    }
    Ok(Tensor::from_vec(flat, (indices.len(), dim), device)?)
}

/// Weighted ELBO: `alpha * recon + beta * kl + gamma * latent_reg`, averaged
/// over the batch.
fn batch_loss(
    model: &dyn ManifoldVae,
    x: &Tensor,
    config: &RunConfig,
    train: bool,
) -> Result<Tensor, MlError> {
    let out = model.forward(x, train)?;
    let recon_term = match config.gen_likelihood_type.as_str() {
        "gaussian" => (out.recon.clone() - x)?.sqr()?.sum(D::Minus1)?,
        "poisson" => {
            let log_rate = (out.recon.clone() + 1e-8)?.log()?;
            ((out.recon.clone() - (x * log_rate)?)?).sum(D::Minus1)?
        }
        other => {
            return Err(MlError::training(format!(
                "unknown gen_likelihood_type {other}"
            )))
        }
    };
    let per_sample = (((recon_term * config.alpha)? + (out.kl * config.beta)?)?
        + (out.latent_reg * config.gamma)?)?;
    Ok(per_sample.mean(D::Minus1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_run_config;
    use crate::datasets;
    use crate::models::create_model;

    #[test]
    fn tiny_run_trains_and_keeps_histories() {
        let mut config = minimal_run_config();
        config.n_times = Some(64);
        config.n_epochs = 2;
        config.encoder_width = 8;
        config.decoder_width = 8;
        config.encoder_depth = 1;
        config.decoder_depth = 1;
        let (dataset, split) = datasets::load(&mut config).unwrap();
        let device = config.candle_device().unwrap();
        let (model, mut varmap) = create_model(&config, &device).unwrap();

        let outcome =
            train_test(model.as_ref(), &mut varmap, &dataset, &split, &config, None, None)
                .unwrap();
        assert_eq!(outcome.train_losses.len(), 2);
        assert_eq!(outcome.test_losses.len(), 2);
        assert!(outcome.train_losses.iter().all(|l| l.is_finite()));
        assert!(outcome.metrics.best_epoch.is_some());
    }

    #[test]
    fn unknown_likelihood_is_rejected() {
        let mut config = minimal_run_config();
        config.gen_likelihood_type = "bernoulli".to_string();
        config.n_times = Some(32);
        let (dataset, split) = datasets::load(&mut config).unwrap();
        let device = config.candle_device().unwrap();
        let (model, mut varmap) = create_model(&config, &device).unwrap();
        let result = train_test(
            model.as_ref(),
            &mut varmap,
            &dataset,
            &split,
            &config,
            None,
            None,
        );
        assert!(result.is_err());
    }
}
