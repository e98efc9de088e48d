//! Optimizers and learning-rate schedules

use super::Param;

/// Updates parameters in place from their accumulated gradients
pub trait Optimizer {
    fn lr(&self) -> f64;

    fn set_lr(&mut self, lr: f64);

    /// Apply one update; parameters must arrive in the same order each call.
    fn step(&mut self, params: Vec<Param<'_>>);
}

/// Stochastic gradient descent with momentum and L2 weight decay
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f64,
    momentum: f64,
    weight_decay: f64,
    velocity: Vec<Vec<f32>>,
}

impl Sgd {
    pub fn new(lr: f64, momentum: f64, weight_decay: f64) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            velocity: Vec::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn step(&mut self, params: Vec<Param<'_>>) {
        if self.velocity.len() != params.len() {
            self.velocity = params.iter().map(|p| vec![0.0; p.value.len()]).collect();
        }
        let (lr, mu, wd) = (self.lr as f32, self.momentum as f32, self.weight_decay as f32);
        for (param, velocity) in params.into_iter().zip(self.velocity.iter_mut()) {
            let decay = if param.decay { wd } else { 0.0 };
            for ((v, &g), buf) in param.value.iter_mut().zip(param.grad).zip(velocity.iter_mut()) {
                let grad = g + decay * *v;
                *buf = mu * *buf + grad;
                *v -= lr * *buf;
            }
        }
    }
}

/// Adam with decoupled weight decay
#[derive(Debug, Clone)]
pub struct AdamW {
    lr: f64,
    betas: (f64, f64),
    eps: f64,
    weight_decay: f64,
    step_count: i32,
    first_moment: Vec<Vec<f32>>,
    second_moment: Vec<Vec<f32>>,
}

impl AdamW {
    pub fn new(lr: f64, betas: (f64, f64), weight_decay: f64) -> Self {
        Self {
            lr,
            betas,
            eps: 1e-8,
            weight_decay,
            step_count: 0,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
        }
    }
}

impl Optimizer for AdamW {
    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn step(&mut self, params: Vec<Param<'_>>) {
        if self.first_moment.len() != params.len() {
            self.first_moment = params.iter().map(|p| vec![0.0; p.value.len()]).collect();
            self.second_moment = self.first_moment.clone();
            self.step_count = 0;
        }
        self.step_count = self.step_count.saturating_add(1);

        let (b1, b2) = self.betas;
        let bias1 = 1.0 - b1.powi(self.step_count);
        let bias2 = 1.0 - b2.powi(self.step_count);
        let (lr, eps, wd) = (self.lr, self.eps, self.weight_decay);

        for ((param, m), s) in params
            .into_iter()
            .zip(self.first_moment.iter_mut())
            .zip(self.second_moment.iter_mut())
        {
            for (((v, &g), m), s) in param
                .value
                .iter_mut()
                .zip(param.grad)
                .zip(m.iter_mut())
                .zip(s.iter_mut())
            {
                if param.decay {
                    *v -= (lr * wd) as f32 * *v;
                }
                let g = g as f64;
                let m_next = b1 * *m as f64 + (1.0 - b1) * g;
                let s_next = b2 * *s as f64 + (1.0 - b2) * g * g;
                *m = m_next as f32;
                *s = s_next as f32;
                let update = lr * (m_next / bias1) / ((s_next / bias2).sqrt() + eps);
                *v -= update as f32;
            }
        }
    }
}

/// Learning-rate schedule stepped once per training epoch
pub trait LrScheduler {
    /// Current learning rate
    fn lr(&self) -> f64;

    fn step(&mut self);
}

/// Fixed learning rate
#[derive(Debug, Clone)]
pub struct ConstantLr {
    lr: f64,
}

impl ConstantLr {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl LrScheduler for ConstantLr {
    fn lr(&self) -> f64 {
        self.lr
    }

    fn step(&mut self) {}
}

/// Triangular cyclic schedule with an exponentially decaying amplitude
/// (`exp_range` mode).
#[derive(Debug, Clone)]
pub struct CyclicLr {
    base_lr: f64,
    max_lr: f64,
    step_size_up: usize,
    step_size_down: usize,
    gamma: f64,
    last_step: usize,
}

impl CyclicLr {
    pub fn new(base_lr: f64, max_lr: f64, step_size_up: usize, gamma: f64) -> Self {
        let up = step_size_up.max(1);
        Self {
            base_lr,
            max_lr,
            step_size_up: up,
            step_size_down: up,
            gamma,
            last_step: 0,
        }
    }

    /// Standard schedule for a run: base = lr/10, peak = lr, a quarter of
    /// the epochs per half-cycle, gamma 0.98.
    pub fn for_epochs(lr: f64, epochs: usize) -> Self {
        Self::new(lr / 10.0, lr, epochs / 4, 0.98)
    }
}

impl LrScheduler for CyclicLr {
    fn lr(&self) -> f64 {
        let total = (self.step_size_up + self.step_size_down) as f64;
        let step_ratio = self.step_size_up as f64 / total;
        let t = self.last_step as f64;
        let cycle = (1.0 + t / total).floor();
        let x = 1.0 + t / total - cycle;
        let scale = if x <= step_ratio {
            x / step_ratio
        } else {
            (x - 1.0) / (step_ratio - 1.0)
        };
        let height = (self.max_lr - self.base_lr) * scale;
        self.base_lr + height * self.gamma.powf(t)
    }

    fn step(&mut self) {
        self.last_step += 1;
    }
}
