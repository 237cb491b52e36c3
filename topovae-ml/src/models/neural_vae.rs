//! VAE with a Euclidean (gaussian) or spherical (hyperspherical) latent.

use candle_core::{Device, Tensor, D};
use candle_nn::{Linear, Module, VarMap};
use rand::rngs::StdRng;

use super::{
    noise_like, normalize_rows, row_norms, seeded_linear, softplus, uniform_prior_kl, ManifoldVae,
    Mlp, VaeOutput,
};
use crate::config::RunConfig;
use crate::error::MlError;

pub struct NeuralVae {
    encoder: Mlp,
    fc_mu: Linear,
    fc_logvar: Linear,
    decoder: Mlp,
    fc_out: Linear,
    hyperspherical: bool,
    latent_dim: usize,
    /// Latent representation width: `latent_dim` for gaussian, the ambient
    /// `latent_dim + 1` unit vector for hyperspherical.
    rep_dim: usize,
    sftbeta: f64,
    device: Device,
}

impl NeuralVae {
    pub fn new(
        config: &RunConfig,
        data_dim: usize,
        varmap: &VarMap,
        rng: &mut StdRng,
        device: Device,
    ) -> Result<Self, MlError> {
        let hyperspherical = config.posterior_type == "hyperspherical";
        let rep_dim = if hyperspherical {
            config.latent_dim + 1
        } else {
            config.latent_dim
        };
        let encoder = Mlp::new(
            varmap,
            "encoder",
            data_dim,
            config.encoder_width,
            config.encoder_depth,
            config.drop_out_p,
            rng,
            &device,
        )?;
        let fc_mu = seeded_linear(varmap, "fc_mu", config.encoder_width, rep_dim, rng, &device)?;
        let fc_logvar =
            seeded_linear(varmap, "fc_logvar", config.encoder_width, rep_dim, rng, &device)?;
        let decoder = Mlp::new(
            varmap,
            "decoder",
            rep_dim,
            config.decoder_width,
            config.decoder_depth,
            config.drop_out_p,
            rng,
            &device,
        )?;
        let fc_out = seeded_linear(varmap, "fc_out", config.decoder_width, data_dim, rng, &device)?;
        Ok(Self {
            encoder,
            fc_mu,
            fc_logvar,
            decoder,
            fc_out,
            hyperspherical,
            latent_dim: config.latent_dim,
            rep_dim,
            sftbeta: config.sftbeta,
            device,
        })
    }

    fn decode_inner(&self, z: &Tensor, train: bool) -> Result<Tensor, MlError> {
        let h = self.decoder.forward(z, train)?;
        softplus(&self.fc_out.forward(&h)?, self.sftbeta)
    }
}

impl ManifoldVae for NeuralVae {
    fn forward(&self, x: &Tensor, train: bool) -> Result<VaeOutput, MlError> {
        let h = self.encoder.forward(x, train)?;
        let mu = self.fc_mu.forward(&h)?;
        let logvar = self.fc_logvar.forward(&h)?;
        let sigma = (logvar.clone() * 0.5)?.exp()?;
        let eps = noise_like(&mu)?;
        let jitter = (sigma * eps)?;

        let (z, kl, latent_reg) = if self.hyperspherical {
            let mu_unit = normalize_rows(&mu)?;
            let z = normalize_rows(&(mu_unit + jitter)?)?;
            let kl = uniform_prior_kl(&logvar)?;
            let latent_reg = (row_norms(&mu)? - 1.0)?.sqr()?;
            (z, kl, latent_reg)
        } else {
            let z = (mu.clone() + jitter)?;
            let elems = (((logvar.clone() + 1.0)? - mu.sqr()?)? - logvar.exp()?)?;
            let kl = (elems * -0.5)?.sum(D::Minus1)?;
            let latent_reg = mu.sqr()?.sum(D::Minus1)?;
            (z, kl, latent_reg)
        };

        let recon = self.decode_inner(&z, train)?;
        Ok(VaeOutput {
            recon,
            z,
            kl,
            latent_reg,
        })
    }

    fn decode(&self, z: &Tensor) -> Result<Tensor, MlError> {
        self.decode_inner(z, false)
    }

    fn latent_embedding(&self, angles: &[Vec<f64>]) -> Result<Tensor, MlError> {
        let n = angles.len();
        let mut flat: Vec<f32> = Vec::with_capacity(n * self.rep_dim);
        for row in angles {
            if self.hyperspherical {
                match self.latent_dim {
                    1 => {
                        let theta = row[0];
                        flat.push(theta.cos() as f32);
                        flat.push(theta.sin() as f32);
                    }
                    2 => {
                        let (theta, phi) = (row[0], row[1]);
                        flat.push((theta.sin() * phi.cos()) as f32);
                        flat.push((theta.sin() * phi.sin()) as f32);
                        flat.push(theta.cos() as f32);
                    }
                    d => {
                        return Err(MlError::evaluation(format!(
                            "hyperspherical latent grid supports 1- or 2-sphere charts, got dim {d}"
                        )))
                    }
                }
            } else {
                for &v in row.iter().take(self.rep_dim) {
                    flat.push(v as f32);
                }
            }
        }
        Ok(Tensor::from_vec(flat, (n, self.rep_dim), &self.device)?)
    }

    fn encode_latent(&self, x: &Tensor) -> Result<Vec<Vec<f64>>, MlError> {
        let h = self.encoder.forward(x, false)?;
        let mu: Vec<Vec<f32>> = self.fc_mu.forward(&h)?.to_vec2()?;
        let coords = mu
            .into_iter()
            .map(|row| {
                let row: Vec<f64> = row.into_iter().map(f64::from).collect();
                if self.hyperspherical {
                    match self.latent_dim {
                        1 => vec![row[1].atan2(row[0])],
                        2 => {
                            let norm =
                                (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt();
                            let z = if norm > 0.0 { row[2] / norm } else { 0.0 };
                            vec![z.clamp(-1.0, 1.0).acos(), row[1].atan2(row[0])]
                        }
                        _ => row,
                    }
                } else {
                    row
                }
            })
            .collect();
        Ok(coords)
    }

    fn latent_input_dim(&self) -> usize {
        self.rep_dim
    }

    fn posterior_type(&self) -> &'static str {
        if self.hyperspherical {
            "hyperspherical"
        } else {
            "gaussian"
        }
    }
}
