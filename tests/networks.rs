use approx::assert_relative_eq;
use neural_cpu::backend::{Backend, CpuBackend, default_backend};
use neural_cpu::functions::{ActivationType, CostFunctionType};
use neural_cpu::layers::{
    BiasInitialization, FullyConnectedLayer, Gradient, Layer, LayerSpec, OutputLayer,
};
use neural_cpu::network::{ComputationGraphBuilder, Network, SequentialNetwork};
use neural_cpu::ops::cpu::SumMode;
use neural_cpu::optim::TrainingAlgorithm;
use neural_cpu::tensors::{SamplesBatch, Tensor, TensorInfo};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex};

fn rows<const N: usize>(data: &[[f32; N]]) -> Tensor {
    Tensor::from_rows(data).unwrap()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 2 → 2 → 2 sigmoid network with fixed weights and a quadratic cost.
fn fixture_network() -> SequentialNetwork {
    let hidden = FullyConnectedLayer::from_parts(
        TensorInfo::linear(2),
        rows(&[[0.1, 0.2], [0.3, 0.4]]),
        rows(&[[0.5, 0.5]]),
        ActivationType::Sigmoid,
    )
    .unwrap();
    let output = OutputLayer::from_parts(
        TensorInfo::linear(2),
        rows(&[[0.5, 0.6], [0.7, 0.8]]),
        rows(&[[0.1, 0.1]]),
        ActivationType::Sigmoid,
        CostFunctionType::Quadratic,
    )
    .unwrap();
    SequentialNetwork::from_layers(vec![Layer::FullyConnected(hidden), Layer::Output(output)], default_backend())
        .unwrap()
}

fn fixture_batch() -> SamplesBatch {
    SamplesBatch::new(rows(&[[1.0, 2.0]]), rows(&[[3.0, 4.0]])).unwrap()
}

#[test]
fn output_delta_matches_the_chain_rule() {
    let network = fixture_network();
    let delta = network.output_delta(&fixture_batch()).unwrap();

    let a1 = [sigmoid(1.2), sigmoid(1.5)];
    let z2 = [a1[0] * 0.5 + a1[1] * 0.7 + 0.1, a1[0] * 0.6 + a1[1] * 0.8 + 0.1];
    let a2 = z2.map(sigmoid);
    let expected = [(a2[0] - 3.0) * a2[0] * (1.0 - a2[0]), (a2[1] - 4.0) * a2[1] * (1.0 - a2[1])];
    assert_relative_eq!(delta.data()[0], expected[0], max_relative = 1e-5);
    assert_relative_eq!(delta.data()[1], expected[1], max_relative = 1e-5);
}

#[test]
fn sgd_step_on_a_single_sample() {
    let mut network = fixture_network();
    let batch = fixture_batch();
    let updater = TrainingAlgorithm::sgd(0.5, 0.0).create_updater(&network).unwrap();
    network.backpropagate(&batch, 0.0, &mut StdRng::seed_from_u64(0), updater.as_ref()).unwrap();

    let x = [1.0, 2.0];
    let z1 = [1.2_f32, 1.5];
    let a1 = z1.map(sigmoid);
    let w2 = [[0.5, 0.6], [0.7, 0.8]];
    let z2 = [a1[0] * w2[0][0] + a1[1] * w2[1][0] + 0.1, a1[0] * w2[0][1] + a1[1] * w2[1][1] + 0.1];
    let a2 = z2.map(sigmoid);
    let d2 = [(a2[0] - 3.0) * a2[0] * (1.0 - a2[0]), (a2[1] - 4.0) * a2[1] * (1.0 - a2[1])];
    let d1 = [0, 1].map(|k| (d2[0] * w2[k][0] + d2[1] * w2[k][1]) * a1[k] * (1.0 - a1[k]));

    let layers = network.layers();
    let w1 = layers[0].weights().unwrap().data();
    let b1 = layers[0].biases().unwrap().data();
    let w2_new = layers[1].weights().unwrap().data();
    let b2 = layers[1].biases().unwrap().data();
    let w1_old = [[0.1, 0.2], [0.3, 0.4]];
    for i in 0..2 {
        for k in 0..2 {
            assert_relative_eq!(w1[i * 2 + k], w1_old[i][k] - 0.5 * x[i] * d1[k], max_relative = 1e-5);
            assert_relative_eq!(w2_new[i * 2 + k], w2[i][k] - 0.5 * a1[i] * d2[k], max_relative = 1e-5);
        }
        assert_relative_eq!(b1[i], 0.5 - 0.5 * d1[i], max_relative = 1e-5);
        assert_relative_eq!(b2[i], 0.1 - 0.5 * d2[i], max_relative = 1e-5);
    }
}

#[test]
fn identical_seeds_build_identical_networks() {
    let specs = [
        LayerSpec::fully_connected(2, ActivationType::Sigmoid),
        LayerSpec::output(2, ActivationType::Sigmoid, CostFunctionType::Quadratic),
    ];
    let build = || {
        SequentialNetwork::new(TensorInfo::linear(2), &specs, &mut StdRng::seed_from_u64(2024), default_backend())
            .unwrap()
    };
    let (first, second) = (build(), build());
    assert_eq!(
        first.output_delta(&fixture_batch()).unwrap(),
        second.output_delta(&fixture_batch()).unwrap()
    );
}

fn recorded_gradients(network: &mut dyn Network, batch: &SamplesBatch) -> Vec<Gradient> {
    let recorded = Mutex::new(Vec::new());
    let recorder = |index: usize, gradient: &Gradient, _: usize, _: &mut Layer| {
        recorded.lock().unwrap().push((index, gradient.clone()));
    };
    network.backpropagate(batch, 0.0, &mut StdRng::seed_from_u64(0), &recorder).unwrap();
    let mut recorded = recorded.into_inner().unwrap();
    recorded.sort_by_key(|(index, _)| *index);
    recorded.into_iter().map(|(_, gradient)| gradient).collect()
}

fn cost(network: &dyn Network, batch: &SamplesBatch) -> f32 {
    network.evaluate(batch.x.view(), batch.y.view()).unwrap().cost
}

/// Compares the backpropagated gradient of every parameter against a central
/// difference of the cost. `build` assembles a network from weighted layers.
fn check_network_gradients(layers: &[Layer], build: impl Fn(Vec<Layer>) -> Box<dyn Network>, batch: &SamplesBatch) {
    let mut network = build(layers.to_vec());
    let gradients = recorded_gradients(network.as_mut(), batch);
    assert_eq!(gradients.len(), layers.len());
    let h = 1e-2_f32;

    for (l, gradient) in gradients.iter().enumerate() {
        for (which, analytic) in [&gradient.weights, &gradient.biases].into_iter().enumerate() {
            for index in 0..analytic.size() {
                let perturbed = |step: f32| {
                    let mut layers = layers.to_vec();
                    let (weights, biases) = layers[l].parameters_mut().unwrap();
                    let target = if which == 0 { weights } else { biases };
                    target.data_mut()[index] += step;
                    cost(build(layers).as_ref(), batch)
                };
                let numeric = (perturbed(h) - perturbed(-h)) / (2.0 * h);
                assert_relative_eq!(analytic.data()[index], numeric, epsilon = 1e-2, max_relative = 5e-2);
            }
        }
    }
}

fn one_hot_batch(inputs: usize) -> SamplesBatch {
    let x = Tensor::from_vec(1, inputs, (0..inputs).map(|i| ((i as f32) * 0.61).sin()).collect()).unwrap();
    SamplesBatch::new(x, rows(&[[0.0, 1.0]])).unwrap()
}

#[test]
fn sequential_gradients_match_finite_differences() {
    let mut rng = StdRng::seed_from_u64(17);
    let conv = LayerSpec::convolutional(2, 2, 2, ActivationType::Tanh)
        .with_bias_initialization(BiasInitialization::Gaussian)
        .build(TensorInfo::image(5, 5), &mut rng)
        .unwrap();
    let dense = LayerSpec::fully_connected(3, ActivationType::Sigmoid)
        .build(conv.output_info(), &mut rng)
        .unwrap();
    let output = LayerSpec::softmax(2).build(dense.output_info(), &mut rng).unwrap();
    let build = |layers: Vec<Layer>| -> Box<dyn Network> {
        Box::new(SequentialNetwork::from_layers(layers, default_backend()).unwrap())
    };
    check_network_gradients(&[conv, dense, output], build, &one_hot_batch(25));
}

/// `input → left, right`, `sum(left, right)`, `concat(sum, right) → output`.
fn branching_graph(layers: Vec<Layer>) -> Box<dyn Network> {
    let mut layers = layers.into_iter();
    let mut builder = ComputationGraphBuilder::new(TensorInfo::linear(4), 0);
    let input = builder.input();
    let left = builder.add_layer(input, layers.next().unwrap()).unwrap();
    let right = builder.add_layer(input, layers.next().unwrap()).unwrap();
    let sum = builder.sum(&[left, right]).unwrap();
    let merged = builder.depth_concatenation(&[sum, right]).unwrap();
    let output = builder.add_layer(merged, layers.next().unwrap()).unwrap();
    Box::new(builder.build(output, default_backend()).unwrap())
}

#[test]
fn graph_gradients_match_finite_differences() {
    let mut rng = StdRng::seed_from_u64(5);
    let left = LayerSpec::fully_connected(3, ActivationType::Tanh)
        .build(TensorInfo::linear(4), &mut rng)
        .unwrap();
    let right = LayerSpec::fully_connected(3, ActivationType::Sigmoid)
        .with_bias_initialization(BiasInitialization::Gaussian)
        .build(TensorInfo::linear(4), &mut rng)
        .unwrap();
    let output = LayerSpec::softmax(2).build(TensorInfo::new(1, 3, 2), &mut rng).unwrap();
    check_network_gradients(&[left, right, output], branching_graph, &one_hot_batch(4));
}

#[test]
fn depth_concatenation_matches_a_wider_dense_layer() {
    let wa = rows(&[[0.1, -0.2, 0.3], [0.4, 0.5, -0.6], [-0.7, 0.8, 0.9]]);
    let wb = rows(&[[1.0, 0.0, -1.0], [0.5, -0.5, 0.25], [0.2, 0.3, -0.4]]);
    let (ba, bb) = (rows(&[[0.1, 0.2, 0.3]]), rows(&[[-0.1, -0.2, -0.3]]));
    let out_w = Tensor::from_vec(6, 2, (0..12).map(|i| ((i as f32) * 0.7).cos()).collect()).unwrap();
    let out_b = rows(&[[0.05, -0.05]]);
    let input = TensorInfo::linear(3);
    let dense = |w: &Tensor, b: &Tensor| {
        Layer::FullyConnected(FullyConnectedLayer::from_parts(input, w.clone(), b.clone(), ActivationType::Tanh).unwrap())
    };
    let output = |info: TensorInfo| {
        Layer::Output(
            OutputLayer::from_parts(info, out_w.clone(), out_b.clone(), ActivationType::Softmax, CostFunctionType::LogLikelihood)
                .unwrap(),
        )
    };

    let mut builder = ComputationGraphBuilder::new(input, 0);
    let root = builder.input();
    let a = builder.add_layer(root, dense(&wa, &ba)).unwrap();
    let b = builder.add_layer(root, dense(&wb, &bb)).unwrap();
    let merged = builder.depth_concatenation(&[a, b]).unwrap();
    let out = builder.add_layer(merged, output(TensorInfo::new(1, 3, 2))).unwrap();
    let graph = builder.build(out, default_backend()).unwrap();

    let mut wide_w = Vec::new();
    for r in 0..3 {
        wide_w.extend_from_slice(wa.row(r));
        wide_w.extend_from_slice(wb.row(r));
    }
    let wide_w = Tensor::from_vec(3, 6, wide_w).unwrap();
    let wide_b = rows(&[[0.1, 0.2, 0.3, -0.1, -0.2, -0.3]]);
    let sequential = SequentialNetwork::from_layers(
        vec![dense(&wide_w, &wide_b), output(TensorInfo::linear(6))],
        default_backend(),
    )
    .unwrap();

    let x = rows(&[[0.3, -1.0, 2.0], [1.5, 0.0, -0.5]]);
    assert!(graph.forward(x.view()).unwrap().approx_eq(&sequential.forward(x.view()).unwrap()));
}

#[test]
fn sum_with_the_input_is_a_residual_connection() {
    let mut rng = StdRng::seed_from_u64(9);
    let input = TensorInfo::linear(3);
    let hidden = LayerSpec::fully_connected(3, ActivationType::Tanh).build(input, &mut rng).unwrap();
    let output = LayerSpec::softmax(2).build(input, &mut rng).unwrap();

    let mut builder = ComputationGraphBuilder::new(input, 0);
    let root = builder.input();
    let h = builder.add_layer(root, hidden.clone()).unwrap();
    let residual = builder.sum(&[h, root]).unwrap();
    let out = builder.add_layer(residual, output.clone()).unwrap();
    let graph = builder.build(out, default_backend()).unwrap();

    let backend = CpuBackend::new();
    let x = rows(&[[0.5, -0.25, 1.0], [2.0, 1.0, 0.0]]);
    let (_, a) = hidden.forward(&backend, x.view()).unwrap();
    let merged = backend.sum(a.view(), x.view(), SumMode::Elementwise).unwrap();
    let (_, expected) = output.forward(&backend, merged.view()).unwrap();
    assert!(graph.forward(x.view()).unwrap().approx_eq(&expected));
}

#[test]
fn training_does_not_depend_on_the_thread_count() {
    let specs = [
        LayerSpec::convolutional(3, 3, 3, ActivationType::ReLU),
        LayerSpec::pooling(ActivationType::Identity),
        LayerSpec::fully_connected(6, ActivationType::Tanh),
        LayerSpec::softmax(3),
    ];
    let x = Tensor::from_vec(6, 64, (0..6 * 64).map(|i| ((i as f32) * 0.13).sin()).collect()).unwrap();
    let y = Tensor::from_vec(6, 3, (0..18).map(|i| if i % 3 == (i / 3) % 3 { 1.0 } else { 0.0 }).collect()).unwrap();
    let batch = SamplesBatch::new(x, y).unwrap();

    let run = |threads: usize| {
        let backend: Arc<dyn Backend> = Arc::new(CpuBackend::with_threads(threads).unwrap());
        let mut network =
            SequentialNetwork::new(TensorInfo::image(8, 8), &specs, &mut StdRng::seed_from_u64(3), backend).unwrap();
        let updater = TrainingAlgorithm::adam().create_updater(&network).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..3 {
            network.backpropagate(&batch, 0.25, &mut rng, updater.as_ref()).unwrap();
        }
        network
    };
    let (single, many) = (run(1), run(4));
    assert!(single.approx_eq(&many));
}

#[test]
fn mismatched_batches_are_rejected_before_any_update() {
    let mut network = fixture_network();
    let before = network.clone();
    let batch = SamplesBatch::new(rows(&[[1.0, 2.0, 3.0]]), rows(&[[3.0, 4.0]])).unwrap();
    let updater = TrainingAlgorithm::sgd(0.5, 0.0).create_updater(&network).unwrap();
    assert!(network.backpropagate(&batch, 0.0, &mut StdRng::seed_from_u64(0), updater.as_ref()).is_err());
    assert!(network.approx_eq(&before));
}
