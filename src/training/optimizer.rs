//! One network of the pair together with its own Adam optimizer

use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use tracing::debug;

use super::schedule::MOM1;
use crate::model::CoTeachingNet;

type AdamAdaptor<B> = OptimizerAdaptor<Adam, CoTeachingNet<B>, B>;

fn adam<B: AutodiffBackend>(beta_1: f32) -> AdamAdaptor<B> {
    AdamConfig::new()
        .with_beta_1(beta_1)
        .with_epsilon(1e-8)
        .init()
}

/// A network and the optimizer that only ever sees its gradients
pub struct NetworkSlot<B: AutodiffBackend> {
    pub model: CoTeachingNet<B>,
    optimizer: AdamAdaptor<B>,
    learning_rate: f64,
    beta_1: f32,
    name: &'static str,
}

impl<B: AutodiffBackend> NetworkSlot<B> {
    pub fn new(name: &'static str, model: CoTeachingNet<B>, learning_rate: f64) -> Self {
        Self {
            model,
            optimizer: adam::<B>(MOM1),
            learning_rate,
            beta_1: MOM1,
            name,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn beta_1(&self) -> f32 {
        self.beta_1
    }

    /// Set the step size and Adam `beta_1` for the coming epoch
    ///
    /// A new `beta_1` rebuilds the optimizer and carries the moment estimates
    /// over through its record.
    pub fn adjust(&mut self, learning_rate: f64, beta_1: f32) {
        self.learning_rate = learning_rate;

        if beta_1 != self.beta_1 {
            let record = self.optimizer.to_record();
            self.optimizer = adam::<B>(beta_1).load_record(record);
            debug!("{}: beta_1 {} -> {}", self.name, self.beta_1, beta_1);
            self.beta_1 = beta_1;
        }
    }

    /// Back-propagate `loss` and apply one optimizer step
    pub fn step(&mut self, loss: Tensor<B, 1>) {
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self
            .optimizer
            .step(self.learning_rate, self.model.clone(), grads);
    }

    pub fn into_model(self) -> CoTeachingNet<B> {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CoTeachingNetConfig;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_model() -> CoTeachingNet<TestBackend> {
        CoTeachingNetConfig::new(2)
            .with_depth(1)
            .with_base_filters(2)
            .with_hidden_units(4)
            .with_dropout_rate(0.0)
            .init(&Default::default())
    }

    fn loss_of(model: &CoTeachingNet<TestBackend>) -> Tensor<TestBackend, 1> {
        let x = Tensor::<TestBackend, 4>::ones([2, 3, 4, 4], &Default::default());
        model.forward(x).powf_scalar(2.0).mean()
    }

    fn value(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    #[test]
    fn test_step_updates_weights() {
        let mut slot = NetworkSlot::new("net", tiny_model(), 1e-2);
        let before = value(loss_of(&slot.model));

        for _ in 0..5 {
            let loss = loss_of(&slot.model);
            slot.step(loss);
        }

        assert_ne!(value(loss_of(&slot.model)), before);
    }

    #[test]
    fn test_adjust_rebuilds_on_beta_change() {
        let mut slot = NetworkSlot::new("net", tiny_model(), 1e-2);
        let loss = loss_of(&slot.model);
        slot.step(loss);

        slot.adjust(5e-3, 0.1);
        assert_eq!(slot.learning_rate(), 5e-3);
        assert_eq!(slot.beta_1(), 0.1);

        // the carried-over state keeps stepping
        let loss = loss_of(&slot.model);
        slot.step(loss);
        assert!(value(loss_of(&slot.model)).is_finite());
    }

    #[test]
    fn test_zero_learning_rate_keeps_weights() {
        let mut slot = NetworkSlot::new("net", tiny_model(), 0.0);
        let before = value(loss_of(&slot.model));
        let loss = loss_of(&slot.model);
        slot.step(loss);
        assert_eq!(value(loss_of(&slot.model)), before);
    }
}
