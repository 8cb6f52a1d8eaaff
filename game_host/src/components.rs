use scripting::TypeKey;

/// Plain 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(&self, factor: f64) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// World-space position component.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.x += delta.x;
        self.y += delta.y;
        self.z += delta.z;
    }

    pub fn to_vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

/// Named scene object. Tracks the component types attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct GameObject {
    pub name: String,
    pub components: Vec<TypeKey>,
}

impl GameObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
        }
    }

    pub fn has(&self, key: TypeKey) -> bool {
        self.components.contains(&key)
    }

    /// Returns false if a component of that type was already attached.
    pub fn attach(&mut self, key: TypeKey) -> bool {
        if self.has(key) {
            return false;
        }
        self.components.push(key);
        true
    }

    pub fn detach(&mut self, key: TypeKey) -> bool {
        let before = self.components.len();
        self.components.retain(|k| *k != key);
        self.components.len() != before
    }
}
