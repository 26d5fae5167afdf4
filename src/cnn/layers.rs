use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView3, Axis, ShapeError};

/// Stride 1, "same" zero padding. Weight is `out x (in * k * k)`.
#[derive(Debug, Clone)]
pub struct Conv2d {
    weight: Array2<f32>,
    bias: Array1<f32>,
    in_channels: usize,
    kernel_size: usize,
}

impl Conv2d {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>, in_channels: usize, kernel_size: usize) -> Self {
        debug_assert_eq!(weight.ncols(), in_channels * kernel_size * kernel_size);
        debug_assert_eq!(weight.nrows(), bias.len());
        Self {
            weight,
            bias,
            in_channels,
            kernel_size,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, input: ArrayView3<f32>) -> Result<Array3<f32>, ShapeError> {
        let (channels, height, width) = input.dim();
        debug_assert_eq!(channels, self.in_channels);

        let columns = self.im2col(input);
        let mut output = self.weight.dot(&columns);
        output += &self.bias.view().insert_axis(Axis(1));

        output.into_shape_with_order((self.out_channels(), height, width))
    }

    fn im2col(&self, input: ArrayView3<f32>) -> Array2<f32> {
        let (channels, height, width) = input.dim();
        let k = self.kernel_size;
        let pad = (k / 2) as isize;
        let mut columns = Array2::<f32>::zeros((channels * k * k, height * width));

        for c in 0..channels {
            for ky in 0..k {
                for kx in 0..k {
                    let row = (c * k + ky) * k + kx;
                    let mut column = columns.row_mut(row);
                    for y in 0..height {
                        let iy = y as isize + ky as isize - pad;
                        if iy < 0 || iy >= height as isize {
                            continue;
                        }
                        for x in 0..width {
                            let ix = x as isize + kx as isize - pad;
                            if ix < 0 || ix >= width as isize {
                                continue;
                            }
                            column[y * width + x] = input[[c, iy as usize, ix as usize]];
                        }
                    }
                }
            }
        }

        columns
    }
}

/// Fully-connected layer, `weight` is `out x in` as in PyTorch.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Self {
        debug_assert_eq!(weight.nrows(), bias.len());
        Self { weight, bias }
    }

    pub fn forward(&self, input: ArrayView1<f32>) -> Array1<f32> {
        self.weight.dot(&input) + &self.bias
    }
}

pub fn relu_inplace<D: ndarray::Dimension>(input: &mut ndarray::Array<f32, D>) {
    input.mapv_inplace(|v| v.max(0.));
}

/// 2x2 max pooling with stride 2. Odd trailing rows/columns are dropped.
pub fn max_pool2(input: ArrayView3<f32>) -> Array3<f32> {
    let (channels, height, width) = input.dim();
    Array3::from_shape_fn((channels, height / 2, width / 2), |(c, y, x)| {
        input
            .slice(s![c, 2 * y..2 * y + 2, 2 * x..2 * x + 2])
            .fold(f32::NEG_INFINITY, |acc, v| acc.max(*v))
    })
}
