//! VAE with a Klein-bottle latent.
//!
//! The chart is the double-cover angle pair (psi, phi) with the
//! orientation-reversing glue (psi + pi, -phi) ~ (psi, phi). The decoder sees
//! a 5-component feature embedding that is smooth and invariant under the
//! identification:
//!
//! [cos(2 psi), sin(2 psi), cos(phi), sin(phi) cos(psi), sin(phi) sin(psi)]
//!
//! where the first two components are expanded as polynomials in
//! (cos psi, sin psi) so everything stays differentiable in-graph.

use candle_core::{Device, Tensor, D};
use candle_nn::{Linear, Module, VarMap};
use rand::rngs::StdRng;

use super::toroidal_vae::rotate_pairs;
use super::{
    noise_like, normalize_rows, row_norms, seeded_linear, softplus, uniform_prior_kl, ManifoldVae,
    Mlp, VaeOutput,
};
use crate::config::RunConfig;
use crate::error::MlError;

const FEATURE_DIM: usize = 5;

pub struct KleinBottleVae {
    encoder: Mlp,
    fc_mu: Linear,
    fc_logvar: Linear,
    decoder: Mlp,
    fc_out: Linear,
    sftbeta: f64,
    device: Device,
}

impl KleinBottleVae {
    pub fn new(
        config: &RunConfig,
        data_dim: usize,
        varmap: &VarMap,
        rng: &mut StdRng,
        device: Device,
    ) -> Result<Self, MlError> {
        if config.latent_dim != 2 {
            return Err(MlError::model(format!(
                "klein_bottle posterior requires latent_dim = 2, got {}",
                config.latent_dim
            )));
        }
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
        let fc_mu = seeded_linear(varmap, "fc_mu", config.encoder_width, 4, rng, &device)?;
        let fc_logvar = seeded_linear(varmap, "fc_logvar", config.encoder_width, 2, rng, &device)?;
        let decoder = Mlp::new(
            varmap,
            "decoder",
            FEATURE_DIM,
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
            sftbeta: config.sftbeta,
            device,
        })
    }

    fn decode_inner(&self, z: &Tensor, train: bool) -> Result<Tensor, MlError> {
        let h = self.decoder.forward(z, train)?;
        softplus(&self.fc_out.forward(&h)?, self.sftbeta)
    }

    /// Build the identification-invariant feature embedding from per-angle
    /// cosine/sine columns of shape (batch,).
    fn features(
        c_psi: &Tensor,
        s_psi: &Tensor,
        c_phi: &Tensor,
        s_phi: &Tensor,
    ) -> Result<Tensor, MlError> {
        let cos_2psi = (c_psi.sqr()? - s_psi.sqr()?)?;
        let sin_2psi = ((c_psi * s_psi)? * 2.0)?;
        let twist_c = (s_phi * c_psi)?;
        let twist_s = (s_phi * s_psi)?;
        Ok(Tensor::stack(
            &[&cos_2psi, &sin_2psi, c_phi, &twist_c, &twist_s],
            1,
        )?)
    }
}

impl ManifoldVae for KleinBottleVae {
    fn forward(&self, x: &Tensor, train: bool) -> Result<VaeOutput, MlError> {
        let h = self.encoder.forward(x, train)?;
        let mu_flat = self.fc_mu.forward(&h)?;
        let (bs, _) = mu_flat.dims2()?;
        let mu_pairs = mu_flat.reshape((bs, 2, 2))?;
        let mu_unit = normalize_rows(&mu_pairs)?;
        let logvar = self.fc_logvar.forward(&h)?;

        let sigma = (logvar.clone() * 0.5)?.exp()?;
        let delta = (sigma * noise_like(&logvar)?)?;
        let (c_rot, s_rot) = rotate_pairs(&mu_unit, &delta)?;

        let c_psi = c_rot.narrow(1, 0, 1)?.squeeze(1)?;
        let c_phi = c_rot.narrow(1, 1, 1)?.squeeze(1)?;
        let s_psi = s_rot.narrow(1, 0, 1)?.squeeze(1)?;
        let s_phi = s_rot.narrow(1, 1, 1)?.squeeze(1)?;
        let z = Self::features(&c_psi, &s_psi, &c_phi, &s_phi)?;

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
        let mut flat: Vec<f32> = Vec::with_capacity(n * FEATURE_DIM);
        for row in angles {
            let (psi, phi) = (row[0], row[1]);
            flat.push((2.0 * psi).cos() as f32);
            flat.push((2.0 * psi).sin() as f32);
            flat.push(phi.cos() as f32);
            flat.push((phi.sin() * psi.cos()) as f32);
            flat.push((phi.sin() * psi.sin()) as f32);
        }
        Ok(Tensor::from_vec(flat, (n, FEATURE_DIM), &self.device)?)
    }

    fn encode_latent(&self, x: &Tensor) -> Result<Vec<Vec<f64>>, MlError> {
        let h = self.encoder.forward(x, false)?;
        let mu_flat = self.fc_mu.forward(&h)?;
        let rows: Vec<Vec<f32>> = mu_flat.to_vec2()?;
        Ok(rows
            .into_iter()
            .map(|r| {
                vec![
                    (r[1] as f64).atan2(r[0] as f64),
                    (r[3] as f64).atan2(r[2] as f64),
                ]
            })
            .collect())
    }

    fn latent_input_dim(&self) -> usize {
        FEATURE_DIM
    }

    fn posterior_type(&self) -> &'static str {
        "klein_bottle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_run_config;
    use crate::models::create_model;

    #[test]
    fn latent_embedding_respects_the_klein_glue() {
        let mut config = minimal_run_config();
        config.posterior_type = "klein_bottle".to_string();
        config.latent_dim = 2;
        config.data_dim = Some(4);
        let (model, _vm) = create_model(&config, &Device::Cpu).unwrap();

        let psi = 0.7;
        let phi = 1.3;
        let a = model
            .latent_embedding(&[vec![psi, phi]])
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        let b = model
            .latent_embedding(&[vec![psi + std::f64::consts::PI, -phi]])
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        for (x, y) in a[0].iter().zip(&b[0]) {
            assert!((x - y).abs() < 1e-6, "glued points must embed identically");
        }
    }

    #[test]
    fn latent_dim_other_than_two_is_rejected() {
        let mut config = minimal_run_config();
        config.posterior_type = "klein_bottle".to_string();
        config.latent_dim = 3;
        config.data_dim = Some(4);
        assert!(create_model(&config, &Device::Cpu).is_err());
    }
}
