// crates/model-gate-probes/src/onnx_ops.rs
// ============================================================================
// Module: ONNX Operator Registry
// Description: Operator schemas of the standard ONNX operator sets.
// Purpose: Reject nodes whose op_type does not exist at the imported opset.
// Dependencies: None.
// ============================================================================

//! ## Overview
//! Each standard operator set lists its operators with the opset version that
//! introduced them, plus the version that deprecated them where one exists.
//! A node resolves against the newest schema whose version does not exceed
//! the opset its domain imports. Domains outside the standard sets are
//! custom and have no schemas to check.

// ============================================================================
// SECTION: Types
// ============================================================================

/// One standard operator set.
struct OperatorSet {
    /// Canonical domain name; the default domain is the empty string.
    domain: &'static str,
    /// Newest opset version with known schemas.
    max_version: i64,
    /// Operator names grouped by the opset version that introduced them.
    operators: &'static [(i64, &'static [&'static str])],
    /// Operators and the opset version that deprecated them.
    deprecated: &'static [(&'static str, i64)],
}

/// Outcome of resolving an operator against an imported opset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// A live schema exists at the imported version.
    Registered,
    /// The domain is not a standard operator set.
    CustomDomain,
    /// No schema exists at or below the imported version.
    Unregistered,
    /// The newest applicable schema was deprecated at or before the version.
    Deprecated,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// The default `ai.onnx` operator set.
const AI_ONNX: OperatorSet = OperatorSet {
    domain: "",
    max_version: 23,
    operators: &[
        (1, &[
            "Abs", "Add", "And", "ArgMax", "ArgMin", "AveragePool", "BatchNormalization", "Cast", "Ceil",
            "Clip", "Concat", "Constant", "Conv", "ConvTranspose", "DepthToSpace", "Div", "Dropout", "Elu",
            "Equal", "Exp", "Flatten", "Floor", "GRU", "Gather", "Gemm", "GlobalAveragePool", "GlobalLpPool",
            "GlobalMaxPool", "Greater", "HardSigmoid", "Hardmax", "Identity", "If", "InstanceNormalization",
            "LRN", "LSTM", "LeakyRelu", "Less", "Log", "LogSoftmax", "Loop", "LpNormalization", "LpPool",
            "MatMul", "Max", "MaxPool", "MaxRoiPool", "Mean", "Min", "Mul", "Neg", "Not", "Or", "PRelu",
            "Pad", "Pow", "RNN", "RandomNormal", "RandomNormalLike", "RandomUniform", "RandomUniformLike",
            "Reciprocal", "ReduceL1", "ReduceL2", "ReduceLogSum", "ReduceLogSumExp", "ReduceMax",
            "ReduceMean", "ReduceMin", "ReduceProd", "ReduceSum", "ReduceSumSquare", "Relu", "Reshape",
            "Selu", "Shape", "Sigmoid", "Size", "Slice", "Softmax", "Softplus", "Softsign", "SpaceToDepth",
            "Split", "Sqrt", "Squeeze", "Sub", "Sum", "Tanh", "Tile", "TopK", "Transpose", "Unsqueeze", "Xor",
        ]),
        (7, &["Acos", "Asin", "Atan", "Cos", "Multinomial", "Sin", "Tan", "Upsample"]),
        (8, &["Expand", "Scan"]),
        (9, &[
            "Acosh", "Asinh", "Atanh", "Compress", "ConstantOfShape", "Cosh", "Erf", "EyeLike", "IsNaN",
            "MaxUnpool", "MeanVarianceNormalization", "NonZero", "OneHot", "Scatter", "Shrink", "Sign",
            "Sinh", "TfIdfVectorizer", "Where",
        ]),
        (10, &[
            "ConvInteger", "DequantizeLinear", "IsInf", "MatMulInteger", "Mod", "NonMaxSuppression",
            "QLinearConv", "QLinearMatMul", "QuantizeLinear", "Resize", "ReverseSequence", "RoiAlign",
            "StringNormalizer", "ThresholdedRelu",
        ]),
        (11, &[
            "BitShift", "ConcatFromSequence", "CumSum", "Det", "DynamicQuantizeLinear", "GatherElements",
            "GatherND", "Range", "Round", "ScatterElements", "ScatterND", "SequenceAt", "SequenceConstruct",
            "SequenceEmpty", "SequenceErase", "SequenceInsert", "SequenceLength", "SplitToSequence", "Unique",
        ]),
        (12, &[
            "Celu", "Einsum", "GreaterOrEqual", "LessOrEqual", "NegativeLogLikelihoodLoss",
            "SoftmaxCrossEntropyLoss",
        ]),
        (14, &["HardSwish", "Trilu"]),
        (15, &["Bernoulli", "CastLike", "Optional", "OptionalGetElement", "OptionalHasElement"]),
        (16, &["GridSample"]),
        (17, &[
            "BlackmanWindow", "DFT", "HammingWindow", "HannWindow", "LayerNormalization", "MelWeightMatrix",
            "STFT", "SequenceMap",
        ]),
        (18, &[
            "BitwiseAnd", "BitwiseNot", "BitwiseOr", "BitwiseXor", "CenterCropPad", "Col2Im",
            "GroupNormalization", "Mish",
        ]),
        (19, &["DeformConv"]),
        (20, &["AffineGrid", "Gelu", "ImageDecoder", "RegexFullMatch", "StringConcat", "StringSplit"]),
        (23, &["Attention", "RMSNormalization", "RotaryEmbedding"]),
    ],
    deprecated: &[("Upsample", 10), ("Scatter", 11)],
};

/// The `ai.onnx.ml` operator set.
const AI_ONNX_ML: OperatorSet = OperatorSet {
    domain: "ai.onnx.ml",
    max_version: 5,
    operators: &[
        (1, &[
            "ArrayFeatureExtractor", "Binarizer", "CastMap", "CategoryMapper", "DictVectorizer",
            "FeatureVectorizer", "Imputer", "LabelEncoder", "LinearClassifier", "LinearRegressor",
            "Normalizer", "OneHotEncoder", "SVMClassifier", "SVMRegressor", "Scaler",
            "TreeEnsembleClassifier", "TreeEnsembleRegressor", "ZipMap",
        ]),
        (5, &["TreeEnsemble"]),
    ],
    deprecated: &[],
};

/// The `ai.onnx.preview.training` operator set.
const AI_ONNX_TRAINING: OperatorSet = OperatorSet {
    domain: "ai.onnx.preview.training",
    max_version: 1,
    operators: &[(1, &["Adagrad", "Adam", "Gradient", "Momentum"])],
    deprecated: &[],
};

/// Every standard operator set.
static OPERATOR_SETS: [OperatorSet; 3] = [AI_ONNX, AI_ONNX_ML, AI_ONNX_TRAINING];

// ============================================================================
// SECTION: Lookup
// ============================================================================

/// Maps the `ai.onnx` alias to the default domain.
#[must_use]
pub fn canonical_domain(domain: &str) -> &str {
    if domain == "ai.onnx" { "" } else { domain }
}

/// Returns the newest opset version known for a standard domain.
#[must_use]
pub fn max_opset_version(domain: &str) -> Option<i64> {
    operator_set(domain).map(|set| set.max_version)
}

/// Resolves `op_type` in `domain` at the imported opset `version`.
#[must_use]
pub fn resolve_operator(domain: &str, op_type: &str, version: i64) -> OpStatus {
    let Some(set) = operator_set(domain) else {
        return OpStatus::CustomDomain;
    };
    let introduced = set
        .operators
        .iter()
        .any(|(since, names)| *since <= version && names.contains(&op_type));
    if !introduced {
        return OpStatus::Unregistered;
    }
    let deprecated = set
        .deprecated
        .iter()
        .any(|(name, since)| *name == op_type && *since <= version);
    if deprecated { OpStatus::Deprecated } else { OpStatus::Registered }
}

/// Finds the standard operator set for `domain`.
fn operator_set(domain: &str) -> Option<&'static OperatorSet> {
    let domain = canonical_domain(domain);
    OPERATOR_SETS.iter().find(|set| set.domain == domain)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
