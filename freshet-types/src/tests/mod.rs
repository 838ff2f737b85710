mod app_yaml_deserialize;
