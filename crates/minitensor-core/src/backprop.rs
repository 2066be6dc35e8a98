// Backpropagation — Reverse-mode automatic differentiation
//
// HOW IT WORKS:
//
//   1. Forward pass: tensor operations build a DAG where each tensor stores
//      the Op that created it (see op.rs). Only tensors that require grad
//      record an Op.
//
//   2. backward() topologically sorts the part of the DAG that requires
//      grad, from the root down to the leaves.
//
//   3. The root's gradient (ones unless it already has one) seeds a
//      pass-local GradStore. Walking in reverse topological order, each
//      node's rule runs exactly once, with the TOTAL gradient every consumer
//      contributed to it, and pushes one contribution per parent.
//
//   4. Only when the whole walk succeeded are the pass totals added into
//      the tensors' gradient slots. A failing rule (a zero divisor that
//      appeared through set_data, say) therefore leaves every gradient as
//      it was.
//
// ACCUMULATION: If a tensor is used in multiple operations, its gradient is
// the SUM of contributions from each use (multivariate chain rule). Because
// every consumer of a node comes before it in reverse topological order, the
// node's total is complete by the time its own rule runs.
//
// GRADIENT RULES (g = gradient w.r.t. the output, y = the output):
//
//   Add:        ga += g                 gb += g
//   Sub:        ga += g                 gb += -g
//   Mul:        ga += g * b             gb += g * a
//   Div:        ga += g / b             gb += g * (-a / b²)
//   Scalar:     a+k, a-k → g   a*k → g*k   a/k → g/k   k-a → -g   k/a → g*(-k/a²)
//   Matmul:     ga += g @ bᵀ            gb += aᵀ @ g
//   Transpose:  ga += gᵀ
//   Reshape:    ga += reshape(g, a.shape)
//   Sum:        ga += g replicated along the reduced axis
//   Mean:       ga += g replicated / n
//   Max/Min:    ga[winner] += g, zero elsewhere
//   Relu:       ga += g where a > 0
//   Tanh:       ga += g * (1 - y²)
//   Sigmoid:    ga += g * y * (1 - y)
//   Exp:        ga += g * y
//   Log:        ga += g / a
//   Sqrt:       ga += g / (2y)
//   Sin/Cos/Tan ga += g*cos(a) / -g*sin(a) / g*(1 + y²)
//   Powf(p):    ga += g * p * a^(p-1)
//   Mse:        gp += g * 2(p - t)/N        gt += -gp
//   Mae:        gp += g * sign(p - t)/N     gt += -gp
//   Bce:        gp += g * (p - t)/(p(1 - p)N)
//               gt += g * -(ln p - ln(1 - p))/N
//
// Broadcast binary ops produce contributions at the output shape; those are
// summed back to the operand's shape with dense::unbroadcast.
//
// Integer graphs use checked arithmetic throughout: a gradient that does not
// fit the element type fails the pass with Error::Overflow.

use std::collections::{HashMap, HashSet};

use crate::dense;
use crate::dtype::WithDType;
use crate::error::{Error, Result};
use crate::op::{Axis, BinaryOp, LossOp, Op, ReduceOp, ScalarOp, TensorId, UnaryOp};
use crate::tensor::Tensor;

/// Gradients gathered during one backward pass, keyed by tensor.
///
/// Remembers the tensors it has seen in first-contribution order so the
/// totals can be committed to gradient slots after the walk.
struct GradStore<T: WithDType> {
    grads: HashMap<TensorId, Vec<T>>,
    touched: Vec<Tensor<T>>,
}

impl<T: WithDType> GradStore<T> {
    fn new() -> Self {
        GradStore {
            grads: HashMap::new(),
            touched: Vec::new(),
        }
    }

    /// Add a contribution for `tensor`, summing with earlier ones.
    fn accumulate(&mut self, tensor: &Tensor<T>, grad: Vec<T>) -> Result<()> {
        match self.grads.get_mut(&tensor.id()) {
            Some(existing) => {
                for (e, g) in existing.iter_mut().zip(grad) {
                    *e = e.try_add(g).ok_or(Error::Overflow { op: "backward" })?;
                }
            }
            None => {
                self.grads.insert(tensor.id(), grad);
                self.touched.push(tensor.clone());
            }
        }
        Ok(())
    }

    fn get(&self, id: &TensorId) -> Option<&Vec<T>> {
        self.grads.get(id)
    }
}

/// Build a topological ordering of the requires-grad part of the graph.
///
/// Returns tensors in order such that every tensor appears AFTER all its
/// inputs (leaves first, root last). Iterative depth-first search, so deep
/// graphs do not grow the call stack.
fn build_topo<T: WithDType>(root: &Tensor<T>) -> Vec<Tensor<T>> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    // (tensor, inputs already pushed)
    let mut stack = vec![(root.clone(), false)];

    while let Some((t, expanded)) = stack.pop() {
        if expanded {
            order.push(t);
            continue;
        }
        if !visited.insert(t.id()) {
            continue;
        }
        let inputs: Vec<Tensor<T>> = t
            .op()
            .inputs()
            .into_iter()
            .filter(|i| i.requires_grad() && !visited.contains(&i.id()))
            .cloned()
            .collect();
        stack.push((t, true));
        stack.extend(inputs.into_iter().map(|i| (i, false)));
    }
    order
}

/// Backpropagate from `root` into every tensor of its graph that requires grad.
#[tracing::instrument(level = "debug", skip_all, fields(root = %root.id(), shape = %root.shape()))]
pub fn backward<T: WithDType>(root: &Tensor<T>) -> Result<()> {
    if !root.requires_grad() {
        tracing::debug!("root does not require grad, nothing to do");
        return Ok(());
    }

    let topo = build_topo(root);
    let mut grads = GradStore::new();
    grads.grads.insert(root.id(), root.grad_or_ones()?);

    for node in topo.iter().rev() {
        let op = node.op();
        if matches!(op, Op::None) {
            continue;
        }
        let grad_out = match grads.get(&node.id()) {
            Some(g) => g.clone(),
            None => continue,
        };
        let _span =
            tracing::trace_span!("node", op = op.backward_name(), id = %node.id()).entered();
        for (parent, grad) in node_grads(node, op, &grad_out)? {
            grads.accumulate(parent, grad)?;
        }
    }

    // The walk succeeded: commit.
    root.seed_grad()?;
    for tensor in &grads.touched {
        if let Some(total) = grads.get(&tensor.id()) {
            tensor.accumulate_grad(total)?;
        }
    }
    tracing::debug!(
        nodes = topo.len(),
        updated = grads.touched.len(),
        "backward finished"
    );
    Ok(())
}

/// Apply `node`'s rule: one contribution per parent that requires grad, each
/// already shaped like its parent.
fn node_grads<'a, T: WithDType>(
    node: &Tensor<T>,
    op: &'a Op<T>,
    g: &[T],
) -> Result<Vec<(&'a Tensor<T>, Vec<T>)>> {
    let mut out = Vec::with_capacity(2);
    let name = op.backward_name();
    match op {
        Op::None => {}

        Op::Binary { lhs, rhs, op } => {
            let a = lhs.read_data()?;
            let b = rhs.read_data()?;
            let (out_shape, a_shape, b_shape) = (node.shape(), lhs.shape(), rhs.shape());
            if matches!(op, BinaryOp::Div) && b.iter().any(|&v| v == T::zero()) {
                return Err(Error::DivideByZero { op: "div backward" });
            }
            // Operands read at the output shape.
            let at = |data: &[T], shape| dense::expand(data, shape, out_shape);
            if lhs.requires_grad() {
                let ga = match op {
                    BinaryOp::Add | BinaryOp::Sub => g.to_vec(),
                    BinaryOp::Mul => zip_map(g, &at(&b, b_shape)?, name, T::try_mul)?,
                    BinaryOp::Div => zip_map(g, &at(&b, b_shape)?, name, T::try_div)?,
                };
                out.push((lhs, dense::unbroadcast(&ga, out_shape, a_shape)?));
            }
            if rhs.requires_grad() {
                let gb = match op {
                    BinaryOp::Add => g.to_vec(),
                    BinaryOp::Sub => map(g, name, T::try_neg)?,
                    BinaryOp::Mul => zip_map(g, &at(&a, a_shape)?, name, T::try_mul)?,
                    BinaryOp::Div => {
                        // -a / b²
                        let quotient =
                            dense::binary_map(&a, a_shape, &b, b_shape, out_shape, name, |a, b| {
                                a.try_neg()?.try_div(b.try_mul(b)?)
                            })?;
                        zip_map(g, &quotient, name, T::try_mul)?
                    }
                };
                out.push((rhs, dense::unbroadcast(&gb, out_shape, b_shape)?));
            }
        }

        Op::Scalar { input, scalar, op } => {
            if input.requires_grad() {
                let k = *scalar;
                let ga = match op {
                    ScalarOp::Add | ScalarOp::Sub => g.to_vec(),
                    ScalarOp::Mul => map(g, name, |g| g.try_mul(k))?,
                    ScalarOp::Div => map(g, name, |g| g.try_div(k))?,
                    ScalarOp::RSub => map(g, name, T::try_neg)?,
                    ScalarOp::RDiv => {
                        let a = input.read_data()?;
                        if a.iter().any(|&v| v == T::zero()) {
                            return Err(Error::DivideByZero {
                                op: "rdiv_scalar backward",
                            });
                        }
                        zip_map(g, &a, name, |g, a| {
                            g.try_mul(k.try_neg()?.try_div(a.try_mul(a)?)?)
                        })?
                    }
                };
                out.push((input, ga));
            }
        }

        Op::Unary { input, op } => {
            if input.requires_grad() {
                let a = input.read_data()?;
                let y = node.read_data()?;
                out.push((input, unary_grad(*op, name, g, &a, &y)?));
            }
        }

        Op::Powf { input, exponent } => {
            if input.requires_grad() {
                let p = *exponent;
                let a = input.read_data()?;
                let ga = zip_map_f64(g, &a, |g, a| g * p * a.powf(p - 1.0))?;
                out.push((input, ga));
            }
        }

        Op::Reduce {
            input,
            op,
            axis,
            indices,
        } => {
            if input.requires_grad() {
                out.push((input, reduce_grad(*op, *axis, indices, g, input)?));
            }
        }

        Op::Matmul { lhs, rhs } => {
            let (m, k) = (lhs.dims()[0], lhs.dims()[1]);
            let n = rhs.dims()[1];
            if lhs.requires_grad() {
                // g [m, n] @ bᵀ [n, k]
                let bt = dense::transpose2d(&rhs.read_data()?, k, n)?;
                out.push((lhs, dense::matmul(g, &bt, m, n, k)?));
            }
            if rhs.requires_grad() {
                // aᵀ [k, m] @ g [m, n]
                let at = dense::transpose2d(&lhs.read_data()?, m, k)?;
                out.push((rhs, dense::matmul(&at, g, k, m, n)?));
            }
        }

        Op::Transpose { input } => {
            if input.requires_grad() {
                let (rows, cols) = (node.dims()[0], node.dims()[1]);
                out.push((input, dense::transpose2d(g, rows, cols)?));
            }
        }

        Op::Reshape { input, .. } => {
            if input.requires_grad() {
                out.push((input, g.to_vec()));
            }
        }

        Op::Loss {
            prediction,
            target,
            op,
        } => {
            let (gp, gt) = loss_grads(*op, name, g[0], prediction, target)?;
            if prediction.requires_grad() {
                out.push((prediction, gp));
            }
            if target.requires_grad() {
                out.push((target, gt));
            }
        }
    }
    Ok(out)
}

fn map<T: WithDType>(g: &[T], op: &'static str, f: impl Fn(T) -> Option<T>) -> Result<Vec<T>> {
    dense::try_collect(g.iter().map(|&v| f(v)), op)
}

fn zip_map<T: WithDType>(
    g: &[T],
    x: &[T],
    op: &'static str,
    f: impl Fn(T, T) -> Option<T>,
) -> Result<Vec<T>> {
    dense::try_collect(g.iter().zip(x.iter()).map(|(&g, &x)| f(g, x)), op)
}

/// Like `zip_map`, computed in f64. Used by the rules of float-only ops.
fn zip_map_f64<T: WithDType>(g: &[T], x: &[T], f: impl Fn(f64, f64) -> f64) -> Result<Vec<T>> {
    dense::collect(
        g.iter()
            .zip(x.iter())
            .map(|(&g, &x)| T::from_f64(f(g.to_f64(), x.to_f64()))),
    )
}

fn unary_grad<T: WithDType>(
    op: UnaryOp,
    name: &'static str,
    g: &[T],
    a: &[T],
    y: &[T],
) -> Result<Vec<T>> {
    match op {
        UnaryOp::Neg => map(g, name, T::try_neg),
        UnaryOp::Relu => zip_map(g, a, name, |g, a| {
            Some(if a > T::zero() { g } else { T::zero() })
        }),
        UnaryOp::Tanh => zip_map_f64(g, y, |g, y| g * (1.0 - y * y)),
        UnaryOp::Sigmoid => zip_map_f64(g, y, |g, y| g * y * (1.0 - y)),
        UnaryOp::Exp => zip_map_f64(g, y, |g, y| g * y),
        UnaryOp::Log => {
            if a.iter().any(|&v| v == T::zero()) {
                return Err(Error::DivideByZero { op: "log backward" });
            }
            zip_map_f64(g, a, |g, a| g / a)
        }
        UnaryOp::Sqrt => {
            if y.iter().any(|&v| v == T::zero()) {
                return Err(Error::DivideByZero { op: "sqrt backward" });
            }
            zip_map_f64(g, y, |g, y| g / (2.0 * y))
        }
        UnaryOp::Sin => zip_map_f64(g, a, |g, a| g * a.cos()),
        UnaryOp::Cos => zip_map_f64(g, a, |g, a| -g * a.sin()),
        UnaryOp::Tan => zip_map_f64(g, y, |g, y| g * (1.0 + y * y)),
    }
}

fn reduce_grad<T: WithDType>(
    op: ReduceOp,
    axis: Axis,
    indices: &[usize],
    g: &[T],
    input: &Tensor<T>,
) -> Result<Vec<T>> {
    let shape = input.shape();
    match op {
        ReduceOp::Sum | ReduceOp::Mean => {
            let (mut ga, n) = match axis {
                Axis::Full => (dense::alloc(shape.elem_count(), g[0])?, shape.elem_count()),
                Axis::Dim(d) => (dense::replicate_axis(g, shape, d)?, shape.dims()[d]),
            };
            if op == ReduceOp::Mean {
                let n = T::from_usize(n);
                ga.iter_mut().for_each(|v| *v = *v / n);
            }
            Ok(ga)
        }
        ReduceOp::Max | ReduceOp::Min => {
            let mut ga = dense::alloc(shape.elem_count(), T::zero())?;
            for (&winner, &g) in indices.iter().zip(g) {
                ga[winner] += g;
            }
            Ok(ga)
        }
    }
}

fn loss_grads<T: WithDType>(
    op: LossOp,
    name: &'static str,
    g: T,
    prediction: &Tensor<T>,
    target: &Tensor<T>,
) -> Result<(Vec<T>, Vec<T>)> {
    let p = prediction.read_data()?;
    let t = target.read_data()?;
    let count = prediction.elem_count();
    let n = T::from_usize(count);

    let gp = match op {
        LossOp::Mse => {
            let two = T::one() + T::one();
            zip_map(&p, &t, name, |p, t| {
                p.try_sub(t)?.try_mul(two)?.try_mul(g)?.try_div(n)
            })?
        }
        LossOp::Mae => zip_map(&p, &t, name, |p, t| {
            let sign = if p > t {
                T::one()
            } else if p < t {
                -T::one()
            } else {
                T::zero()
            };
            sign.try_mul(g)?.try_div(n)
        })?,
        LossOp::Bce => {
            if p.iter().any(|&v| v == T::zero() || v == T::one()) {
                return Err(Error::DivideByZero { op: "bce backward" });
            }
            let (g, n) = (g.to_f64(), count as f64);
            zip_map_f64(&p, &t, |p, t| g * (p - t) / (p * (1.0 - p) * n))?
        }
    };
    let gt = match op {
        LossOp::Mse | LossOp::Mae => map(&gp, name, T::try_neg)?,
        LossOp::Bce => {
            let (g, n) = (g.to_f64(), count as f64);
            dense::collect(p.iter().map(|&p| {
                let p = p.to_f64();
                T::from_f64(-g * (p.ln() - (1.0 - p).ln()) / n)
            }))?
        }
    };
    Ok((gp, gt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn t(data: &[f64], shape: impl Into<crate::Shape>) -> Tensor<f64> {
        Tensor::from_slice(data, shape, true).unwrap()
    }

    fn grad(t: &Tensor<f64>) -> Vec<f64> {
        t.grad().unwrap().unwrap().to_vec().unwrap()
    }

    #[test]
    fn test_topo_order_leaves_first() {
        let a = t(&[1.0], 1);
        let b = a.mul_scalar(2.0).unwrap();
        let c = b.add(&a).unwrap();
        let order: Vec<TensorId> = build_topo(&c).iter().map(|t| t.id()).collect();
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], c.id());
        let pos = |id| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a.id()) < pos(b.id()));
    }

    #[test]
    fn test_add_mul_grads() {
        let a = t(&[2.0, 3.0], 2);
        let b = t(&[4.0, 5.0], 2);
        let c = a.mul(&b).unwrap().add(&a).unwrap();
        c.backward().unwrap();
        // dc/da = b + 1, dc/db = a
        assert_eq!(grad(&a), vec![5.0, 6.0]);
        assert_eq!(grad(&b), vec![2.0, 3.0]);
        // the root is seeded with ones
        assert_eq!(grad(&c), vec![1.0, 1.0]);
    }

    #[test]
    fn test_div_grads() {
        let a = t(&[6.0], 1);
        let b = t(&[2.0], 1);
        a.div(&b).unwrap().backward().unwrap();
        assert_eq!(grad(&a), vec![0.5]);
        assert_eq!(grad(&b), vec![-1.5]);
    }

    #[test]
    fn test_scalar_grads() {
        let a = t(&[2.0], 1);
        a.rdiv_scalar(8.0).unwrap().backward().unwrap();
        assert_eq!(grad(&a), vec![-2.0]);

        let b = t(&[2.0], 1);
        b.rsub_scalar(1.0).unwrap().mul_scalar(3.0).unwrap().backward().unwrap();
        assert_eq!(grad(&b), vec![-3.0]);
    }

    #[test]
    fn test_broadcast_grads_are_unbroadcast() {
        let a = t(&[1.0, 2.0, 3.0], (3, 1));
        let b = t(&[1.0, 1.0, 1.0, 1.0], (1, 4));
        let c = a.add(&b).unwrap();
        c.backward().unwrap();
        assert_eq!(grad(&a), vec![4.0; 3]);
        assert_eq!(grad(&b), vec![3.0; 4]);
    }

    #[test]
    fn test_max_grad_goes_to_first_winner() {
        let a = t(&[1.0, 7.0, 7.0, 2.0], 4);
        a.max_all().unwrap().backward().unwrap();
        assert_eq!(grad(&a), vec![0.0, 1.0, 0.0, 0.0]);

        // [[3, 1], [2, 4]] min along axis 0 → winners (1, 0) and (0, 1)
        let b = t(&[3.0, 1.0, 2.0, 4.0], (2, 2));
        b.min(0).unwrap().backward().unwrap();
        assert_eq!(grad(&b), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_mean_grad() {
        let a = t(&[1.0; 6], (2, 3));
        a.mean(1).unwrap().backward().unwrap();
        for v in grad(&a) {
            assert_abs_diff_eq!(v, 1.0 / 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_no_grad_root_is_noop() {
        let a = Tensor::from_slice(&[1.0f64], 1, false).unwrap();
        let b = a.mul_scalar(2.0).unwrap();
        b.backward().unwrap();
        assert!(b.grad().unwrap().is_none());
        assert!(a.grad().unwrap().is_none());
    }

    #[test]
    fn test_frozen_parent_gets_no_grad() {
        let w = t(&[2.0], 1);
        let x = Tensor::from_slice(&[3.0f64], 1, false).unwrap();
        w.mul(&x).unwrap().backward().unwrap();
        assert_eq!(grad(&w), vec![3.0]);
        assert!(x.grad().unwrap().is_none());
    }

    #[test]
    fn test_failed_backward_leaves_grads_untouched() {
        let a = t(&[1.0, 2.0], 2);
        let b = t(&[1.0, 1.0], 2);
        let c = a.div(&b).unwrap();
        // A zero divisor that only shows up after the forward pass.
        b.set_data(&[1.0, 0.0]).unwrap();
        assert!(matches!(c.backward(), Err(Error::DivideByZero { .. })));
        assert!(a.grad().unwrap().is_none());
        assert!(c.grad().unwrap().is_none());
    }

    #[test]
    fn test_existing_root_grad_is_the_seed() {
        let a = t(&[1.0, 2.0], 2);
        let c = a.mul_scalar(3.0).unwrap();
        c.backward().unwrap();
        c.backward().unwrap();
        // seeded with the ones left by the first pass, accumulated twice
        assert_eq!(grad(&a), vec![6.0, 6.0]);
        assert_eq!(grad(&c), vec![1.0, 1.0]);
    }

    #[test]
    fn test_integer_graph() {
        let a = Tensor::new(vec![1, 2, 3], 3, true).unwrap();
        let b = Tensor::new(vec![4, 5, 6], 3, true).unwrap();
        a.mul(&b).unwrap().sum_all().unwrap().backward().unwrap();
        assert_eq!(a.grad().unwrap().unwrap().to_vec().unwrap(), vec![4, 5, 6]);
        assert_eq!(b.grad().unwrap().unwrap().to_vec().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_integer_gradient_overflow_fails_the_pass() {
        // d = a * b + a with a = 0: the forward values stay at zero, but
        // dd/da = b + 1 does not fit in an i32.
        let a = Tensor::new(vec![0], 1, true).unwrap();
        let b = Tensor::new(vec![i32::MAX], 1, true).unwrap();
        let d = a.mul(&b).unwrap().add(&a).unwrap();
        assert_eq!(d.to_vec().unwrap(), vec![0]);
        assert!(matches!(d.backward(), Err(Error::Overflow { op: "backward" })));
        assert!(a.grad().unwrap().is_none());
        assert!(b.grad().unwrap().is_none());

        // -a / b² for the divisor: b² overflows.
        let a = Tensor::new(vec![1], 1, false).unwrap();
        let b = Tensor::new(vec![1 << 16], 1, true).unwrap();
        let q = a.div(&b).unwrap();
        assert!(matches!(q.backward(), Err(Error::Overflow { op: "DivBackward" })));
    }
}
