/// Uniform bucket grid over a fixed point set, answering k-nearest queries by
/// expanding square rings of buckets around the query.
#[derive(Debug, Clone)]
pub struct NearestIndex {
    points: Vec<(f64, f64)>,
    origin: (f64, f64),
    bucket: (f64, f64),
    bins: (usize, usize),
    buckets: Vec<Vec<usize>>,
}

impl NearestIndex {
    /// Points must have finite coordinates.
    #[must_use]
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        let (mut xmin, mut xmax, mut ymin, mut ymax) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for &(x, y) in &points {
            xmin = xmin.min(x);
            xmax = xmax.max(x);
            ymin = ymin.min(y);
            ymax = ymax.max(y);
        }
        if points.is_empty() {
            (xmin, xmax, ymin, ymax) = (0.0, 0.0, 0.0, 0.0);
        }

        // Roughly two points per bucket on uniform data.
        let per_axis = ((points.len() as f64 / 2.0).sqrt().ceil() as usize).max(1);
        let bins = (per_axis, per_axis);
        let width = |span: f64| {
            let width = span / per_axis as f64;
            if width > 0.0 { width } else { 1.0 }
        };
        let bucket = (width(xmax - xmin), width(ymax - ymin));

        let mut index = Self {
            points,
            origin: (xmin, ymin),
            bucket,
            bins,
            buckets: vec![Vec::new(); bins.0 * bins.1],
        };
        for idx in 0..index.points.len() {
            let (x, y) = index.points[idx];
            let (bx, by) = index.bin_of(x, y);
            index.buckets[by * bins.0 + bx].push(idx);
        }
        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn bin_of(&self, x: f64, y: f64) -> (usize, usize) {
        let clamp = |offset: f64, width: f64, bins: usize| {
            let cell = (offset / width).floor();
            if cell <= 0.0 {
                0
            } else {
                (cell as usize).min(bins - 1)
            }
        };
        (
            clamp(x - self.origin.0, self.bucket.0, self.bins.0),
            clamp(y - self.origin.1, self.bucket.1, self.bins.1),
        )
    }

    /// The closest accepted point, ties broken by insertion order.
    pub fn nearest(&self, x: f64, y: f64, accept: impl Fn(usize) -> bool) -> Option<usize> {
        self.k_nearest(x, y, 1, accept).first().map(|(idx, _)| *idx)
    }

    /// Up to `k` accepted points ordered by squared distance.
    pub fn k_nearest(
        &self,
        x: f64,
        y: f64,
        k: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Vec<(usize, f64)> {
        let mut found: Vec<(usize, f64)> = Vec::with_capacity(k + 1);
        if k == 0 || self.points.is_empty() {
            return found;
        }

        let (bx, by) = self.bin_of(x, y);
        let max_ring = self.bins.0.max(self.bins.1);
        let step = self.bucket.0.min(self.bucket.1);

        for ring in 0..=max_ring {
            for (cx, cy) in ring_cells(bx, by, ring, self.bins) {
                for &idx in &self.buckets[cy * self.bins.0 + cx] {
                    if !accept(idx) {
                        continue;
                    }
                    let (px, py) = self.points[idx];
                    let d2 = (px - x).powi(2) + (py - y).powi(2);
                    insert_sorted(&mut found, k, (idx, d2));
                }
            }
            // Anything in a later ring is at least `ring * step` away.
            if found.len() == k {
                let reach = ring as f64 * step;
                if found[k - 1].1 <= reach * reach {
                    break;
                }
            }
        }
        found
    }
}

fn insert_sorted(found: &mut Vec<(usize, f64)>, k: usize, candidate: (usize, f64)) {
    let pos = found.partition_point(|(idx, d2)| {
        *d2 < candidate.1 || (*d2 == candidate.1 && *idx < candidate.0)
    });
    if pos < k {
        found.insert(pos, candidate);
        found.truncate(k);
    }
}

fn ring_cells(
    bx: usize,
    by: usize,
    ring: usize,
    bins: (usize, usize),
) -> impl Iterator<Item = (usize, usize)> {
    let r = ring as isize;
    let (bx, by) = (bx as isize, by as isize);
    let (nx, ny) = (bins.0 as isize, bins.1 as isize);
    (-r..=r)
        .flat_map(move |dy| (-r..=r).map(move |dx| (dx, dy)))
        .filter(move |(dx, dy)| dx.abs() == r || dy.abs() == r)
        .map(move |(dx, dy)| (bx + dx, by + dy))
        .filter(move |(cx, cy)| *cx >= 0 && *cy >= 0 && *cx < nx && *cy < ny)
        .map(|(cx, cy)| (cx as usize, cy as usize))
}
