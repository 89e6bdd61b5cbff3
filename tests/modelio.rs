use neural_cpu::NetworkError;
use neural_cpu::backend::default_backend;
use neural_cpu::functions::{ActivationType, CostFunctionType};
use neural_cpu::layers::{Layer, LayerSpec, OutputLayer};
use neural_cpu::modelio::{self, Compression, metadata};
use neural_cpu::network::{ComputationGraphBuilder, ComputationGraphNetwork, Network, NetworkType, SequentialNetwork};
use neural_cpu::tensors::{Tensor, TensorInfo};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn image_network() -> SequentialNetwork {
    let specs = [
        LayerSpec::convolutional(3, 3, 4, ActivationType::LeakyReLU),
        LayerSpec::pooling(ActivationType::ReLU),
        LayerSpec::fully_connected(10, ActivationType::Sigmoid),
        LayerSpec::output(3, ActivationType::Sigmoid, CostFunctionType::CrossEntropy),
    ];
    SequentialNetwork::new(TensorInfo::image_rgb(9, 9), &specs, &mut StdRng::seed_from_u64(21), default_backend())
        .unwrap()
}

fn inception_graph() -> ComputationGraphNetwork {
    let mut builder = ComputationGraphBuilder::new(TensorInfo::image(8, 8), 33);
    let input = builder.input();
    let narrow = builder.layer(input, &LayerSpec::convolutional(3, 3, 2, ActivationType::ReLU)).unwrap();
    let wide = builder.layer(input, &LayerSpec::convolutional(3, 3, 3, ActivationType::Tanh)).unwrap();
    let merged = builder.depth_concatenation(&[narrow, wide]).unwrap();
    let pooled = builder.layer(merged, &LayerSpec::pooling(ActivationType::Identity)).unwrap();
    let dense = builder.layer(pooled, &LayerSpec::fully_connected(5, ActivationType::Tanh)).unwrap();
    let skip = builder.layer(pooled, &LayerSpec::fully_connected(5, ActivationType::Sigmoid)).unwrap();
    let sum = builder.sum(&[dense, skip]).unwrap();
    let output = builder.layer(sum, &LayerSpec::softmax(4)).unwrap();
    builder.build(output, default_backend()).unwrap()
}

fn probe(info: TensorInfo) -> Tensor {
    Tensor::from_vec(2, info.size(), (0..2 * info.size()).map(|i| ((i as f32) * 0.29).sin()).collect()).unwrap()
}

#[test]
fn file_round_trips_in_every_compression() {
    let dir = tempfile::tempdir().unwrap();
    let network = image_network();
    let x = probe(network.input_info());
    for (name, compression) in [
        ("plain.nncp", Compression::None),
        ("fast.nncp", Compression::GzipFast),
        ("default.nncp", Compression::Gzip),
        ("best.nncp", Compression::GzipBest),
    ] {
        let path = dir.path().join(name);
        modelio::save_to_file(&network, &path, compression).unwrap();
        let restored = modelio::load_from_file(&path, default_backend()).unwrap();
        assert!(restored.approx_eq(&network), "{name}");
        assert!(restored.forward(x.view()).unwrap().approx_eq(&network.forward(x.view()).unwrap()));
    }
}

#[test]
fn gzip_files_are_smaller_for_redundant_weights() {
    let output = OutputLayer::from_parts(
        TensorInfo::linear(64),
        Tensor::new(64, 64),
        Tensor::new(1, 64),
        ActivationType::Softmax,
        CostFunctionType::LogLikelihood,
    )
    .unwrap();
    let network = SequentialNetwork::from_layers(vec![Layer::Output(output)], default_backend()).unwrap();
    let (mut plain, mut packed) = (Vec::new(), Vec::new());
    modelio::save(&network, &mut plain, Compression::None).unwrap();
    modelio::save(&network, &mut packed, Compression::GzipBest).unwrap();
    assert!(packed.len() < plain.len() / 10);
}

#[test]
fn graphs_round_trip_with_their_topology() {
    let graph = inception_graph();
    let mut bytes = Vec::new();
    modelio::save(&graph, &mut bytes, Compression::Gzip).unwrap();
    let restored = modelio::load(bytes.as_slice(), default_backend()).unwrap();
    assert_eq!(restored.network_type(), NetworkType::ComputationGraph);
    assert!(restored.approx_eq(&graph));

    let restored_graph = restored.as_graph().unwrap();
    assert_eq!(restored_graph.nodes().len(), graph.nodes().len());
    for (a, b) in restored_graph.nodes().iter().zip(graph.nodes()) {
        assert_eq!(a.tag(), b.tag());
        assert_eq!(a.parents(), b.parents());
        assert_eq!(a.info(), b.info());
    }
    let x = probe(graph.input_info());
    assert!(restored.forward(x.view()).unwrap().approx_eq(&graph.forward(x.view()).unwrap()));
}

#[test]
fn mismatched_shapes_fail_to_load() {
    let network = image_network();
    let mut bytes = Vec::new();
    modelio::save(&network, &mut bytes, Compression::None).unwrap();

    let ok = modelio::load_expecting(bytes.as_slice(), TensorInfo::image_rgb(9, 9), TensorInfo::linear(3), default_backend());
    assert!(ok.is_ok());
    for (input, output) in [
        (TensorInfo::image(9, 9), TensorInfo::linear(3)),
        (TensorInfo::image_rgb(9, 9), TensorInfo::linear(4)),
    ] {
        let result = modelio::load_expecting(bytes.as_slice(), input, output, default_backend());
        assert!(matches!(result, Err(NetworkError::Deserialization(_))));
    }
}

#[test]
fn missing_files_are_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    let result = modelio::load_from_file(dir.path().join("absent.nncp"), default_backend());
    assert!(matches!(result, Err(NetworkError::Io(_))));
}

#[test]
fn metadata_describes_the_graph() {
    let graph = inception_graph();
    let tree = metadata::metadata(&graph);
    assert_eq!(tree.network_type, NetworkType::ComputationGraph);
    assert_eq!(tree.layers.len(), 6);
    assert_eq!(tree.parameters, graph.parameters_count());
    let nodes = tree.nodes.as_ref().unwrap();
    assert_eq!(nodes.len(), graph.nodes().len());

    let mut json = Vec::new();
    metadata::write_json(&graph, &mut json).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(value["network_type"], "computation_graph");
    assert_eq!(value["nodes"][3]["tag"], "depth_concatenation");
    assert_eq!(value["output"]["width"], 4);
}
