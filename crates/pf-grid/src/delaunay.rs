use std::collections::{HashMap, HashSet};

/// A triangle over indices into the input point slice, counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle(pub [usize; 3]);

#[derive(Debug, Clone, Copy)]
struct Working {
    vertices: [usize; 3],
    center: (f64, f64),
    radius_sq: f64,
}

impl Working {
    fn encloses(&self, (x, y): (f64, f64)) -> bool {
        let d2 = (x - self.center.0).powi(2) + (y - self.center.1).powi(2);
        d2 < self.radius_sq * (1.0 - IN_CIRCLE_SLACK)
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.vertices;
        [(a, b), (b, c), (c, a)]
    }
}

// Relative slack on the in-circle test; grids of cocircular points otherwise
// flip between "inside" and "outside" on rounding noise.
const IN_CIRCLE_SLACK: f64 = 1e-10;
const SUPER_SCALE: f64 = 20.0;

/// Bowyer–Watson triangulation. Points must be finite and pairwise distinct.
///
/// Points are inserted in bucket order and each one is located by walking
/// the mesh from the previous insertion, so the cavity search touches only
/// nearby triangles. Returns an empty list when fewer than three points are
/// given or all of them are collinear.
#[must_use]
pub fn triangulate(points: &[(f64, f64)]) -> Vec<Triangle> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }

    // Work in a unit box so the in-circle tolerance is scale free.
    let (mut xmin, mut xmax, mut ymin, mut ymax) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for &(x, y) in points {
        xmin = xmin.min(x);
        xmax = xmax.max(x);
        ymin = ymin.min(y);
        ymax = ymax.max(y);
    }
    let span = (xmax - xmin).max(ymax - ymin);
    if span <= 0.0 {
        return Vec::new();
    }
    let mut vertices: Vec<(f64, f64)> = points
        .iter()
        .map(|(x, y)| ((x - xmin) / span, (y - ymin) / span))
        .collect();

    vertices.push((-SUPER_SCALE, -SUPER_SCALE));
    vertices.push((SUPER_SCALE * 2.0 + 1.0, -SUPER_SCALE));
    vertices.push((0.5, SUPER_SCALE * 2.0 + 1.0));

    let mut mesh = Mesh::default();
    let Some(first) = working(&vertices, [n, n + 1, n + 2]) else {
        return Vec::new();
    };
    let mut last = mesh.add(first);

    for p in insertion_order(&vertices[..n]) {
        let Some(seed) = mesh.locate(&vertices, vertices[p], last) else {
            continue;
        };
        if let Some(added) = mesh.insert(&vertices, p, seed) {
            last = added;
        }
    }

    mesh.triangles
        .into_iter()
        .flatten()
        .filter(|triangle| triangle.vertices.iter().all(|&v| v < n))
        .map(|triangle| Triangle(triangle.vertices))
        .collect()
}

/// Triangles with their adjacency, stored as the owner of each directed edge.
#[derive(Debug, Default)]
struct Mesh {
    triangles: Vec<Option<Working>>,
    edges: HashMap<(usize, usize), usize>,
}

impl Mesh {
    fn add(&mut self, triangle: Working) -> usize {
        let id = self.triangles.len();
        for edge in triangle.edges() {
            self.edges.insert(edge, id);
        }
        self.triangles.push(Some(triangle));
        id
    }

    fn remove(&mut self, id: usize) {
        if let Some(triangle) = self.triangles[id].take() {
            for edge in triangle.edges() {
                self.edges.remove(&edge);
            }
        }
    }

    fn neighbour(&self, (u, v): (usize, usize)) -> Option<usize> {
        self.edges.get(&(v, u)).copied()
    }

    /// Visibility walk from `start` towards `at`. Falls back to a full scan
    /// when the walk leaves the mesh or does not settle.
    fn locate(&self, vertices: &[(f64, f64)], at: (f64, f64), start: usize) -> Option<usize> {
        let mut current = start;
        for _ in 0..self.triangles.len() {
            let Some(triangle) = self.triangles[current] else {
                break;
            };
            let crossing = triangle
                .edges()
                .into_iter()
                .find(|&(u, v)| orient(vertices[u], vertices[v], at) < 0.0);
            match crossing {
                None => return Some(current),
                Some(edge) => match self.neighbour(edge) {
                    Some(next) => current = next,
                    None => break,
                },
            }
        }
        self.triangles.iter().position(|slot| {
            slot.is_some_and(|triangle| {
                triangle
                    .edges()
                    .iter()
                    .all(|&(u, v)| orient(vertices[u], vertices[v], at) >= 0.0)
            })
        })
    }

    /// Replace the cavity of `p` (the triangles around `seed` whose
    /// circumcircle holds it) by a fan around `p`. Returns the last triangle
    /// added.
    fn insert(&mut self, vertices: &[(f64, f64)], p: usize, seed: usize) -> Option<usize> {
        let at = vertices[p];
        let mut cavity = vec![seed];
        let mut members = HashSet::from([seed]);
        let mut pending = vec![seed];
        while let Some(id) = pending.pop() {
            let Some(triangle) = self.triangles[id] else {
                continue;
            };
            for edge in triangle.edges() {
                let Some(next) = self.neighbour(edge) else {
                    continue;
                };
                if members.contains(&next) {
                    continue;
                }
                if self.triangles[next].is_some_and(|candidate| candidate.encloses(at)) {
                    members.insert(next);
                    cavity.push(next);
                    pending.push(next);
                }
            }
        }

        let mut boundary = Vec::new();
        for &id in &cavity {
            let Some(triangle) = self.triangles[id] else {
                continue;
            };
            for edge in triangle.edges() {
                if !self.neighbour(edge).is_some_and(|next| members.contains(&next)) {
                    boundary.push(edge);
                }
            }
        }
        for id in cavity {
            self.remove(id);
        }

        let mut last = None;
        for (u, v) in boundary {
            if let Some(triangle) = working(vertices, [u, v, p]) {
                last = Some(self.add(triangle));
            }
        }
        last
    }
}

fn orient(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// Row-snake order over a bucket grid of the unit box.
fn insertion_order(points: &[(f64, f64)]) -> Vec<usize> {
    let bins = ((points.len() as f64).sqrt().ceil() as usize).max(1);
    let bin = |value: f64| ((value * bins as f64).max(0.0) as usize).min(bins - 1);
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by_key(|&idx| {
        let (x, y) = points[idx];
        let row = bin(y);
        let col = if row % 2 == 0 { bin(x) } else { bins - 1 - bin(x) };
        (row, col, idx)
    });
    order
}

fn working(vertices: &[(f64, f64)], mut idx: [usize; 3]) -> Option<Working> {
    let (ax, ay) = vertices[idx[0]];
    let (mut bx, mut by) = vertices[idx[1]];
    let (mut cx, mut cy) = vertices[idx[2]];
    let mut orient = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
    if orient == 0.0 {
        return None;
    }
    if orient < 0.0 {
        idx.swap(1, 2);
        std::mem::swap(&mut bx, &mut cx);
        std::mem::swap(&mut by, &mut cy);
        orient = -orient;
    }

    let d = 2.0 * orient;
    let (b2, c2) = ((bx - ax).powi(2) + (by - ay).powi(2), (cx - ax).powi(2) + (cy - ay).powi(2));
    let ux = ((cy - ay) * b2 - (by - ay) * c2) / d;
    let uy = ((bx - ax) * c2 - (cx - ax) * b2) / d;
    Some(Working {
        vertices: idx,
        center: (ax + ux, ay + uy),
        radius_sq: ux * ux + uy * uy,
    })
}

/// Barycentric weights of `(x, y)` in triangle `(a, b, c)`, or `None` when the
/// triangle has no area.
#[must_use]
pub fn barycentric(
    (x, y): (f64, f64),
    (ax, ay): (f64, f64),
    (bx, by): (f64, f64),
    (cx, cy): (f64, f64),
) -> Option<[f64; 3]> {
    let det = (by - cy) * (ax - cx) + (cx - bx) * (ay - cy);
    let scale = ((ax - cx).abs() + (bx - cx).abs()) * ((ay - cy).abs() + (by - cy).abs());
    if det == 0.0 || det.abs() <= f64::EPSILON * scale {
        return None;
    }
    let w0 = ((by - cy) * (x - cx) + (cx - bx) * (y - cy)) / det;
    let w1 = ((cy - ay) * (x - cx) + (ax - cx) * (y - cy)) / det;
    Some([w0, w1, 1.0 - w0 - w1])
}
