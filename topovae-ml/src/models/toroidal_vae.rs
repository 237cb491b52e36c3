//! VAE with a flat-torus latent: one circular coordinate per latent dimension.

use candle_core::{Device, Tensor, D};
use candle_nn::{Linear, Module, VarMap};
use rand::rngs::StdRng;

use super::{
    noise_like, normalize_rows, row_norms, seeded_linear, softplus, uniform_prior_kl, ManifoldVae,
    Mlp, VaeOutput,
};
use crate::config::RunConfig;
use crate::error::MlError;

pub struct ToroidalVae {
    encoder: Mlp,
    /// Head producing a 2-vector per latent angle.
    fc_mu: Linear,
    fc_logvar: Linear,
    decoder: Mlp,
    fc_out: Linear,
    latent_dim: usize,
    sftbeta: f64,
    device: Device,
}

impl ToroidalVae {
    pub fn new(
        config: &RunConfig,
        data_dim: usize,
        varmap: &VarMap,
        rng: &mut StdRng,
        device: Device,
    ) -> Result<Self, MlError> {
        let latent_dim = config.latent_dim;
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
        let fc_mu =
            seeded_linear(varmap, "fc_mu", config.encoder_width, 2 * latent_dim, rng, &device)?;
        let fc_logvar =
            seeded_linear(varmap, "fc_logvar", config.encoder_width, latent_dim, rng, &device)?;
        let decoder = Mlp::new(
            varmap,
            "decoder",
            2 * latent_dim,
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
            latent_dim,
            sftbeta: config.sftbeta,
            device,
        })
    }

    fn decode_inner(&self, z: &Tensor, train: bool) -> Result<Tensor, MlError> {
        let h = self.decoder.forward(z, train)?;
        softplus(&self.fc_out.forward(&h)?, self.sftbeta)
    }

    /// Encode to per-angle unit vectors and angular log-variances.
    fn encode_heads(&self, x: &Tensor, train: bool) -> Result<(Tensor, Tensor), MlError> {
        let h = self.encoder.forward(x, train)?;
        let mu_flat = self.fc_mu.forward(&h)?;
        let (bs, _) = mu_flat.dims2()?;
        let mu_pairs = mu_flat.reshape((bs, self.latent_dim, 2))?;
        let logvar = self.fc_logvar.forward(&h)?;
        Ok((mu_pairs, logvar))
    }
}

/// Rotate unit 2-vectors (cos, sin) by the angle tensor `delta`.
pub(crate) fn rotate_pairs(
    mu_unit: &Tensor,
    delta: &Tensor,
) -> Result<(Tensor, Tensor), MlError> {
    let c = mu_unit.narrow(D::Minus1, 0, 1)?.squeeze(D::Minus1)?;
    let s = mu_unit.narrow(D::Minus1, 1, 1)?.squeeze(D::Minus1)?;
    let cos_d = delta.cos()?;
    let sin_d = delta.sin()?;
    let c_rot = ((&c * &cos_d)? - (&s * &sin_d)?)?;
    let s_rot = ((&c * &sin_d)? + (&s * &cos_d)?)?;
    Ok((c_rot, s_rot))
}

impl ManifoldVae for ToroidalVae {
    fn forward(&self, x: &Tensor, train: bool) -> Result<VaeOutput, MlError> {
        let (mu_pairs, logvar) = self.encode_heads(x, train)?;
        let mu_unit = normalize_rows(&mu_pairs)?;
        let sigma = (logvar.clone() * 0.5)?.exp()?;
        let delta = (sigma * noise_like(&logvar)?)?;
        let (c_rot, s_rot) = rotate_pairs(&mu_unit, &delta)?;

        let (bs, _) = logvar.dims2()?;
        let z = Tensor::stack(&[&c_rot, &s_rot], 2)?.reshape((bs, 2 * self.latent_dim))?;

        let kl = uniform_prior_kl(&logvar)?;
        let latent_reg = (row_norms(&mu_pairs)? - 1.0)?.sqr()?.sum(D::Minus1)?;

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
        let mut flat: Vec<f32> = Vec::with_capacity(n * 2 * self.latent_dim);
        for row in angles {
            for k in 0..self.latent_dim {
                flat.push(row[k].cos() as f32);
                flat.push(row[k].sin() as f32);
            }
        }
        Ok(Tensor::from_vec(
            flat,
            (n, 2 * self.latent_dim),
            &self.device,
        )?)
    }

    fn encode_latent(&self, x: &Tensor) -> Result<Vec<Vec<f64>>, MlError> {
        let (mu_pairs, _) = self.encode_heads(x, false)?;
        let pairs: Vec<Vec<Vec<f32>>> = mu_pairs.to_vec3()?;
        Ok(pairs
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|pair| (pair[1] as f64).atan2(pair[0] as f64))
                    .collect()
            })
            .collect())
    }

    fn latent_input_dim(&self) -> usize {
        2 * self.latent_dim
    }

    fn posterior_type(&self) -> &'static str {
        "toroidal"
    }
}
