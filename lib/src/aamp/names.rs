use std::collections::HashMap;

use crate::hash::resource_hash;

/// Common parameter names across the game's parameter archives.
const BUILTIN: &[&str] = &[
    "param_root", "AIs", "AI", "Actions", "Action", "Behaviors", "Behavior", "Queries", "Query",
    "DemoAIActionIdx", "ChildIdx", "Def", "SInst", "BehaviorIdx", "ClassName", "Name",
    "GroupName", "ActorName", "Header", "Normal", "Value", "Values", "Type", "Flag", "Index",
    "Count", "Num", "Path", "File", "Files", "Model", "ModelData", "ModelList", "Unit", "Units",
    "UnitName", "BindBone", "Folder", "FolderName", "Base", "Scale", "Rotate", "Translate",
    "Position", "Item", "Items", "ItemName", "ItemNum", "Table", "Tables", "TableNum",
    "TableName", "ColumnNum", "RepeatNum", "RepeatNumMin", "RepeatNumMax", "ApproachType",
    "OccurrenceSpeedType", "Probability", "Drop", "Shop", "Recipe", "Recipes", "Data", "Elink",
    "Slink", "UserName", "Parameters", "Param", "Params", "Bone", "Bones", "BoneName",
    "Physics", "RigidBody", "RigidBodySet", "RigidBodySetNum", "Shape", "ShapeNum", "Character",
    "Cloth", "Ragdoll", "Support", "ContactInfo", "Contact", "Material", "SubMaterial",
    "Layer", "Attribute", "Tag", "Tags", "Life", "Attack", "Defense", "Weapon", "Armor",
    "General", "Enemy", "Npc", "Player", "System", "Chemical", "Element", "Elements", "Texture",
    "Anim", "Animation", "AnimInfo", "AS", "ASDefine", "ASDefines", "Filename", "Condition",
    "Conditions", "Cond", "Lod", "LodList", "Awareness", "Sensor", "Sight", "Hearing", "Damage",
    "DamageParam", "Fire", "Ice", "Elec", "Water", "Interval", "Rate", "Speed", "Radius",
    "Length", "Width", "Height", "Offset", "Color", "Enable", "IsEnable", "Version",
];

/// Prefixes that appear with numeric suffixes (`Item_000`, `Bone_01`, `AI_3`).
const NUMBERED: &[&str] = &[
    "AI", "Action", "Behavior", "Query", "Item", "Table", "Bone", "Unit", "Shape", "Model",
    "Elink", "Slink", "Recipe", "Cond", "Condition", "Param", "Element", "Layer", "Tag",
    "RigidBody", "Value", "Child", "Drop", "Lod", "ASDefine", "Anim", "Contact",
];

/// Hash to name lookup for AAMP keys. Learns new names as text is parsed.
#[derive(Debug, Clone)]
pub struct AampNames {
    names: HashMap<u32, String>,
}

impl Default for AampNames {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AampNames {
    pub fn empty() -> Self {
        Self {
            names: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut names = Self::empty();
        for name in BUILTIN {
            names.learn(name);
        }
        for prefix in NUMBERED {
            for i in 0..100 {
                names.learn(&format!("{prefix}_{i}"));
                names.learn(&format!("{prefix}_{i:02}"));
                names.learn(&format!("{prefix}_{i:03}"));
                names.learn(&format!("{prefix}{i}"));
            }
        }
        for i in 0..10_000 {
            names.learn(&format!("File{i}"));
        }
        names
    }

    pub fn learn(&mut self, name: &str) -> u32 {
        let hash = resource_hash(name);
        self.names.entry(hash).or_insert_with(|| name.to_string());
        hash
    }

    pub fn get(&self, hash: u32) -> Option<&str> {
        self.names.get(&hash).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_and_numbered_names() {
        let names = AampNames::builtin();
        assert_eq!(names.get(resource_hash("param_root")), Some("param_root"));
        assert_eq!(names.get(resource_hash("Item_007")), Some("Item_007"));
        assert_eq!(names.get(resource_hash("AI_3")), Some("AI_3"));
        assert_eq!(names.get(resource_hash("NotAName")), None);
    }

    #[test]
    fn learned_names_resolve() {
        let mut names = AampNames::empty();
        let hash = names.learn("MyParam");
        assert_eq!(names.get(hash), Some("MyParam"));
    }
}
