//! Global gradient norm over a module's float parameters.

use burn::module::{Module, ModuleVisitor, Param};
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};

struct SquaredNorm<'a> {
    grads: &'a GradientsParams,
    sum: f64,
    finite: bool,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        let Some(grad) = self.grads.get::<B::InnerBackend, D>(param.id.clone()) else {
            return;
        };
        let squared = grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        if squared.is_finite() {
            self.sum += squared;
        } else {
            self.finite = false;
        }
    }
}

/// L2 norm of all gradients of `module`, or `None` if any gradient is
/// NaN or infinite.
pub fn gradient_norm<B, M>(module: &M, grads: &GradientsParams) -> Option<f32>
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let mut visitor = SquaredNorm {
        grads,
        sum: 0.0,
        finite: true,
    };
    module.visit(&mut visitor);
    if visitor.finite {
        Some(visitor.sum.sqrt() as f32)
    } else {
        None
    }
}
