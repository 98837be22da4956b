//! Output topology classification for SCRFD-style detectors.
//!
//! Exported models do not name or order their outputs reliably, so the
//! outputs are grouped by trailing dimension (1 = score, 4 = box,
//! 10 = landmarks) and each group is sorted by anchor count, largest first.
//! The i-th largest group of each kind belongs to the same scale.

use crate::detector::DetectorError;
use crate::engine::RawOutputTensor;

const SCORE_COLS: usize = 1;
const BOX_COLS: usize = 4;
const LANDMARK_COLS: usize = 10;

const STRIDES_3: [usize; 3] = [8, 16, 32];
const STRIDES_5: [usize; 5] = [8, 16, 32, 64, 128];
const BASE_STRIDE: usize = 8;

/// A 2-D view of one output tensor with the batch dimension removed.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputMatrix {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl OutputMatrix {
    /// Row `i` as a slice of `cols` values.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

/// One resolution level of the detector head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleGroup {
    pub stride: usize,
    pub anchors_per_position: usize,
    /// Width and height of the square feature grid, `input_size / stride`.
    pub grid_side: usize,
}

impl ScaleGroup {
    pub fn anchor_count(&self) -> usize {
        self.grid_side * self.grid_side * self.anchors_per_position
    }
}

/// Score, box and landmark outputs for one scale.
#[derive(Debug, Clone)]
pub struct ScaleOutputs {
    pub group: ScaleGroup,
    pub scores: OutputMatrix,
    pub boxes: OutputMatrix,
    pub landmarks: OutputMatrix,
}

/// Classified detector outputs, most detailed scale first.
#[derive(Debug, Clone)]
pub struct Topology {
    pub scales: Vec<ScaleOutputs>,
}

impl Topology {
    pub fn strides(&self) -> Vec<usize> {
        self.scales.iter().map(|s| s.group.stride).collect()
    }

    pub fn anchor_counts(&self) -> Vec<usize> {
        self.scales.iter().map(|s| s.scores.rows).collect()
    }
}

/// Canonical stride for scale `idx` out of `num_scales`.
pub fn stride_for(idx: usize, num_scales: usize) -> usize {
    match num_scales {
        3 => STRIDES_3[idx],
        5 => STRIDES_5[idx],
        _ => BASE_STRIDE << idx,
    }
}

/// Reduce a raw output to `(rows, cols)`.
///
/// A leading batch dimension of 1 is dropped and a flat vector is read as a
/// single column.
fn to_matrix(tensor: RawOutputTensor) -> Result<OutputMatrix, DetectorError> {
    let (rows, cols) = match tensor.shape.as_slice() {
        [n] => (*n, 1),
        [n, c] => (*n, *c),
        [1, n, c] => (*n, *c),
        other => {
            return Err(DetectorError::DecodeFailure(format!(
                "output {} has unsupported shape {other:?}",
                tensor.name
            )));
        }
    };

    if rows * cols != tensor.data.len() {
        return Err(DetectorError::DecodeFailure(format!(
            "output {} has shape {:?} but {} elements",
            tensor.name,
            tensor.shape,
            tensor.data.len()
        )));
    }

    Ok(OutputMatrix {
        name: tensor.name,
        rows,
        cols,
        data: tensor.data,
    })
}

/// Group detector outputs by role and pair them up per scale.
///
/// Fails with [`DetectorError::TopologyMismatch`] when the number of score,
/// box and landmark outputs differ, and with [`DetectorError::DecodeFailure`]
/// when a tensor's shape is unusable or a scale's anchor count does not fit
/// the inferred grid.
pub fn classify_outputs(
    outputs: Vec<RawOutputTensor>,
    input_size: usize,
) -> Result<Topology, DetectorError> {
    let mut scores = Vec::new();
    let mut boxes = Vec::new();
    let mut landmarks = Vec::new();

    for tensor in outputs {
        let matrix = to_matrix(tensor)?;
        match matrix.cols {
            SCORE_COLS => scores.push(matrix),
            BOX_COLS => boxes.push(matrix),
            LANDMARK_COLS => landmarks.push(matrix),
            cols => tracing::debug!(name = %matrix.name, cols, "ignoring unrecognised output"),
        }
    }

    if scores.is_empty() || scores.len() != boxes.len() || scores.len() != landmarks.len() {
        return Err(DetectorError::TopologyMismatch {
            scores: scores.len(),
            boxes: boxes.len(),
            landmarks: landmarks.len(),
        });
    }

    // Stable sort: equal-sized outputs keep their emission order.
    for group in [&mut scores, &mut boxes, &mut landmarks] {
        group.sort_by(|a, b| b.rows.cmp(&a.rows));
    }

    let num_scales = scores.len();
    let base_grid = input_size / stride_for(0, num_scales);
    let anchors_per_position = if base_grid == 0 {
        1
    } else {
        (scores[0].rows / (base_grid * base_grid)).max(1)
    };

    let mut scales = Vec::with_capacity(num_scales);
    let groups = scores.into_iter().zip(boxes).zip(landmarks);
    for (idx, ((score, bbox), kps)) in groups.enumerate() {
        let stride = stride_for(idx, num_scales);
        let group = ScaleGroup {
            stride,
            anchors_per_position,
            grid_side: input_size / stride,
        };

        if score.rows != group.anchor_count() {
            return Err(DetectorError::DecodeFailure(format!(
                "scale {idx} (stride {stride}) has {} anchors, expected {}x{}x{} = {}",
                score.rows,
                group.grid_side,
                group.grid_side,
                anchors_per_position,
                group.anchor_count()
            )));
        }
        if bbox.rows != score.rows || kps.rows != score.rows {
            return Err(DetectorError::DecodeFailure(format!(
                "scale {idx} (stride {stride}) pairs {} scores with {} boxes and {} landmarks",
                score.rows, bbox.rows, kps.rows
            )));
        }

        scales.push(ScaleOutputs {
            group,
            scores: score,
            boxes: bbox,
            landmarks: kps,
        });
    }

    let topology = Topology { scales };
    tracing::debug!(
        strides = ?topology.strides(),
        anchors = ?topology.anchor_counts(),
        anchors_per_position,
        "classified detector outputs"
    );

    Ok(topology)
}
