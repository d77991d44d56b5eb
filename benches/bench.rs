use divan::Bencher;

use pirwls::linalg::blas::Backend;
use pirwls::linalg::dense::DenseMatrix;
use pirwls::linalg::parallel::LinalgContext;

fn main() {
    divan::main();
}

fn spd(n: usize) -> DenseMatrix {
    DenseMatrix::from_fn(n, n, |i, j| {
        if i == j {
            n as f64 + 1.0
        } else {
            1.0 / (1.0 + (i as f64 - j as f64).abs())
        }
    })
}

#[divan::bench(args = [64, 128, 256, 512])]
fn cholesky(bencher: Bencher, n: usize) {
    let a = spd(n);
    let mut ctx = LinalgContext::new(4, n, Backend::default()).unwrap();
    bencher.bench_local(|| {
        let mut l = a.clone();
        ctx.cholesky(l.as_view_mut()).unwrap();
        l
    });
}

#[divan::bench(args = [64, 256, 512])]
fn spd_solve(bencher: Bencher, n: usize) {
    let a = spd(n);
    let b: Vec<f64> = (0..n).map(|i| (i as f64 * 0.1).cos()).collect();
    let mut ctx = LinalgContext::new(4, n, Backend::default()).unwrap();
    bencher.bench_local(|| {
        let mut factor = a.clone();
        let mut x = vec![0.0; n];
        ctx.spd_solve(&mut factor, &b, &mut x, 4).unwrap();
        x
    });
}
