//! Integration test: render all three plots for a small set of tensors.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crownscan_pipeline::{FeatureTensor, GlcmConfig, GlcmKernel, stored_feature_names};
use crownscan_report::{Figure, GridLabels, PlotKind, tree_name};
use ndarray::Array4;

fn tensor(seed: usize) -> FeatureTensor {
    FeatureTensor::from_f32(&Array4::from_shape_fn((12, 9, 2, 7), |(y, x, p, f)| {
        #[allow(clippy::cast_precision_loss)]
        let v = ((y * 13 + x * 7 + p * 3 + f + seed) % 17) as f32 / 17.0;
        v
    }))
}

#[test]
fn set_report_renders_every_plot() {
    let kernel = GlcmKernel::new(GlcmConfig::default()).unwrap();
    let labels = GridLabels::new(
        vec!["NIR".to_owned(), "Red".to_owned()],
        stored_feature_names(&kernel),
    );
    let stems = ["Shorea Leprosula_0", "Ficus_1", "Shorea Leprosula_2"];

    let mut stacked = Figure::new(PlotKind::StackedHistogram, labels.clone());
    for (seed, stem) in stems.iter().enumerate() {
        let tensor = tensor(seed);
        let mut image = Figure::new(PlotKind::ImageGrid, labels.clone());
        let mut hist = Figure::new(PlotKind::HistogramGrid, labels.clone());
        for figure in [&mut image, &mut hist, &mut stacked] {
            figure.plot_tensor(&tensor, tree_name(stem)).unwrap();
        }

        let image_svg = image.render().expect("image grid was drawn");
        assert_eq!(image_svg.matches("data:image/png;base64,").count(), 2 * 7);
        assert!(image_svg.contains(">INTENSITY<"));
        assert!(image_svg.contains(">CORRELATION<"));

        let hist_svg = hist.render().expect("histogram grid was drawn");
        assert_eq!(hist_svg.matches("<path").count(), 2 * 7);
    }

    let stacked_svg = stacked.render().expect("stacked histogram was drawn");
    assert_eq!(stacked_svg.matches("<path").count(), 3 * 2 * 7);
    // One legend entry per region, even when species repeat.
    assert_eq!(stacked_svg.matches(">Shorea Leprosula<").count(), 2);
    assert_eq!(stacked_svg.matches(">Ficus<").count(), 1);
    assert!(stacked.render().is_none());
}
